use crate::collectors::CollectContext;

/// 1 when the stack is in a failed state, 0 otherwise
pub const STACK_FAILED_METRIC: &str = "StackFailed";

/// Attribute holding the provider-reported stack status
pub const STACK_STATUS_ATTRIBUTE: &str = "stack_status";

/// Whether a stack status means the last operation failed
pub fn is_failed_status(status: &str) -> bool {
    status.ends_with("_FAILED")
        || matches!(status, "ROLLBACK_COMPLETE" | "UPDATE_ROLLBACK_COMPLETE")
}

/// Log source carrying the stack's event history
pub fn events_source(stack_name: &str) -> String {
    format!("stack/{}/events", stack_name)
}

/// Infrastructure stack: lifecycle status and event history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackCollector;

impl StackCollector {
    pub async fn gather(&self, ctx: &CollectContext) {
        if let Some(status) = ctx.status().await {
            let failed = if is_failed_status(&status) { 1.0 } else { 0.0 };
            ctx.record_derived(STACK_FAILED_METRIC, "None", ctx.window().end, failed);
            ctx.set_attribute(STACK_STATUS_ATTRIBUTE, status);
        }

        let source = events_source(ctx.resource().short_name());
        ctx.scan_logs(&source).await;
    }
}
