#![allow(dead_code)]

pub use etldag_test_utils::builders::{
    ConfigFileBuilder, ETL_TASKS, RegistryBuilder, TaskConfigBuilder,
};
pub use etldag_test_utils::fake_executor::FakeExecutor;
pub use etldag_test_utils::{init_tracing, pipeline_with_sink, with_timeout};

use etldag::types::{EngineOptions, FailurePolicy};

pub fn options(policy: FailurePolicy, max_workers: usize) -> EngineOptions {
    EngineOptions {
        failure_policy: policy,
        max_workers,
        ..EngineOptions::default()
    }
}

pub fn sequential() -> EngineOptions {
    options(FailurePolicy::CascadeSkip, 1)
}

pub fn parallel(max_workers: usize) -> EngineOptions {
    options(FailurePolicy::CascadeSkip, max_workers)
}
