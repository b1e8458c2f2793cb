//! Prometheus metrics collection and formatting.
//!
//! This module renders framework state in Prometheus text exposition format.

use std::fmt::Write;

use crate::scheduler::ExecutionFramework;

/// Collect all metrics from the framework and format as Prometheus text.
pub async fn collect_metrics(framework: &ExecutionFramework) -> String {
    let mut output = String::new();

    collect_task_metrics(framework, &mut output).await;
    collect_scheduler_metrics(framework, &mut output).await;

    output
}

/// Collect task metrics by lifecycle state.
async fn collect_task_metrics(framework: &ExecutionFramework, output: &mut String) {
    let counts = framework.registry().counts_by_state().await;

    writeln!(
        output,
        "# HELP taskproc_tasks_total Number of tracked tasks by state"
    )
    .ok();
    writeln!(output, "# TYPE taskproc_tasks_total gauge").ok();
    for (state, count) in counts {
        writeln!(output, "taskproc_tasks_total{{state=\"{state}\"}} {count}").ok();
    }
}

async fn collect_scheduler_metrics(framework: &ExecutionFramework, output: &mut String) {
    let pending = framework.pending_len().await;
    let blacklisted = framework.blacklist().len().await;
    let launched = framework.launched_total();
    let frozen = u8::from(framework.is_frozen());

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskproc_pending_tasks Tasks waiting for a matching offer"
    )
    .ok();
    writeln!(output, "# TYPE taskproc_pending_tasks gauge").ok();
    writeln!(output, "taskproc_pending_tasks {pending}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskproc_blacklisted_slaves Hosts currently excluded from scheduling"
    )
    .ok();
    writeln!(output, "# TYPE taskproc_blacklisted_slaves gauge").ok();
    writeln!(output, "taskproc_blacklisted_slaves {blacklisted}").ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP taskproc_tasks_launched_total Tasks launched since start"
    )
    .ok();
    writeln!(output, "# TYPE taskproc_tasks_launched_total counter").ok();
    writeln!(output, "taskproc_tasks_launched_total {launched}").ok();

    writeln!(output).ok();
    writeln!(output, "# HELP taskproc_frozen Whether the framework is shut down").ok();
    writeln!(output, "# TYPE taskproc_frozen gauge").ok();
    writeln!(output, "taskproc_frozen {frozen}").ok();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::driver::mock::RecordingDriver;
    use taskproc_core::{StatusUpdate, TaskId, TaskState};

    #[tokio::test]
    async fn test_collect_metrics_empty_framework() {
        let (framework, _events) = ExecutionFramework::new(
            SchedulerConfig::default(),
            Arc::new(RecordingDriver::default()),
        );
        let output = collect_metrics(&framework).await;

        assert!(output.contains("taskproc_tasks_total{state=\"TASK_STAGING\"} 0"));
        assert!(output.contains("taskproc_tasks_total{state=\"TASK_KILLING\"} 0"));
        assert!(output.contains("taskproc_pending_tasks 0"));
        assert!(output.contains("taskproc_blacklisted_slaves 0"));
        assert!(output.contains("taskproc_frozen 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts_tasks() {
        let (framework, _events) = ExecutionFramework::new(
            SchedulerConfig::default(),
            Arc::new(RecordingDriver::default()),
        );
        framework
            .status_update(StatusUpdate::new(TaskId::new("a.1"), TaskState::Running))
            .await
            .unwrap();
        framework.shutdown().await.unwrap();

        let output = collect_metrics(&framework).await;

        assert!(output.contains("taskproc_tasks_total{state=\"TASK_KILLING\"} 1"));
        assert!(output.contains("taskproc_tasks_total{state=\"TASK_RUNNING\"} 0"));
        assert!(output.contains("taskproc_frozen 1"));
    }
}
