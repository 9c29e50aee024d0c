//! Sequential processing of several documents on one worker thread.

pub mod csv_writer;
pub mod export;
pub mod queue;
pub mod worker;
