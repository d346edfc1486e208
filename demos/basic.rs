//! Allocates a few blocks, releases them and shows how space is reused.
//!
//! Run with `RUST_LOG=trace` to see splits, merges and region mappings.

use tagalloc::MemAlloc;

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut allocator = MemAlloc::new();
    allocator.init();

    let addr1 = allocator.allocate(8)?;
    log_alloc(addr1.as_ptr(), 8);

    let addr2 = allocator.allocate(100)?;
    log_alloc(addr2.as_ptr(), 100);

    let addr3 = allocator.allocate(64 * 1024)?;
    log_alloc(addr3.as_ptr(), 64 * 1024);

    println!("{:?}", allocator.check()?);

    unsafe {
        allocator.release(addr1);
        allocator.release(addr2);
        allocator.release(addr3);
    }

    let addr4 = allocator.allocate(100)?;
    println!("Should be first addr {:?}: {:?}", addr1, addr4);

    println!("{:?}", allocator.check()?);

    Ok(())
}
