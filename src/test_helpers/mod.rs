// Test Helpers Module - scripted collaborators for unit and integration tests
//
// Nothing here talks to a network; workers are simulated in memory so tests can
// script reachability, busy threads and rejections per address or job.

pub mod scripted_worker;

pub use scripted_worker::ScriptedWorkerClient;
