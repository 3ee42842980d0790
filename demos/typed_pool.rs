//! Construct objects straight into pool slots and let them clean up after
//! themselves.

use adaptive_pool::{PoolBox, TypedPool};

#[derive(Debug)]
struct YourObject {
    a: i32,
    b: f64,
}

impl YourObject {
    fn new(a: i32, b: f64) -> Self {
        YourObject { a, b }
    }
}

fn main() {
    env_logger::init();

    // Room for 1000 objects, allocated up front.
    let pool = TypedPool::new(1000).expect("failed to build pool");

    let mut yo = match pool.alloc(YourObject::new(1, 2.0)) {
        Ok(yo) => yo,
        Err(_) => unreachable!("a fresh pool has room"),
    };
    yo.b *= 2.0;
    println!("{:?} lives at {:?}", *yo, PoolBox::as_ptr(&yo));

    // Dropping the box runs YourObject's destructor and returns the slot.
    drop(yo);

    let again = pool.alloc(YourObject::new(3, 4.0)).unwrap();
    println!("{:?}, a + b = {}", again, f64::from(again.a) + again.b);
}
