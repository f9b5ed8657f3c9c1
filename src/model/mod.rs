pub mod client;
pub mod cwl;
pub mod job;
pub mod perf;
pub mod task;
pub mod workunit;

pub use client::{Client, ClientGroup};
pub use cwl::CwlNode;
pub use job::{Acl, Job, JobInfo, JobSpec, JobState, WorkflowInstance};
pub use perf::{JobPerf, PerfStat};
pub use task::{Command, PartInfo, Task, TaskIo, TaskSpec, TaskState};
pub use workunit::{Workunit, WorkunitState};
