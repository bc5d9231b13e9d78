// Worker module - the single background thread that runs every job
//
// - channel: commands sent from submitters to the worker
// - manager: the submission side (enqueue, shutdown, join)
// - dispatcher: the worker loop, job execution and completion marshaling

mod channel;
mod dispatcher;
mod manager;

pub(crate) use manager::WorkQueue;
