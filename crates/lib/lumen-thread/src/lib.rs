mod task_pool;
mod worker;

pub use task_pool::{TaskPool, TaskHandle};
