#[test]
fn is_usable_in_const_contexts() {
    const _ALLOCATOR1: bestfit::Allocator<128> = bestfit::Allocator::new();
    static _ALLOCATOR2: bestfit::Allocator<128> = bestfit::Allocator::new();
    static _POOL: bestfit::RawAllocator<bestfit::HeapMemory<128>> =
        bestfit::RawAllocator::uninit(bestfit::HeapMemory::new());
}

#[test]
fn supports_global_alloc() {
    fn assert<T: core::alloc::GlobalAlloc>(_: T) {}
    assert(bestfit::Allocator::<128>::new())
}

#[test]
fn errors_are_std_errors() {
    fn assert<T: std::error::Error + Copy + Send + Sync + 'static>() {}
    assert::<bestfit::InitError>();
    assert::<bestfit::AllocError>();
    assert::<bestfit::FreeError>();
}

#[test]
fn error_messages() {
    assert_eq!(
        bestfit::AllocError::InvalidSize.to_string(),
        "allocation size has to be larger than zero"
    );
    assert_eq!(
        bestfit::AllocError::OutOfMemory { requested: 64 }.to_string(),
        "no free block can hold 64 bytes"
    );
    assert_eq!(
        bestfit::FreeError::InvalidPointer.to_string(),
        "pointer does not belong to an allocation"
    );
}

#[test]
#[should_panic(expected = "too small heap memory")]
fn min_heap_size_of_two_headers() {
    let _allocator = bestfit::Allocator::<16>::new(); // panic here
}

#[test]
#[should_panic(expected = "divisible by 16")]
fn heap_size_must_be_a_multiple_of_16() {
    let _allocator = bestfit::Allocator::<{ 4096 + 8 }>::new(); // panic here
}
