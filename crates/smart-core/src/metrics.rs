use metrics::{describe_counter, describe_gauge};

pub const ACCESS_EVENTS_TOTAL: &str = "smart_access_events_total";
pub const ACCESS_EVENTS_REJECTED_TOTAL: &str = "smart_access_events_rejected_total";
pub const ACCESS_COUNT_FAILOVER_TOTAL: &str = "smart_access_count_failover_total";
pub const RULE_CHECKS_TOTAL: &str = "smart_rule_checks_total";
pub const RULE_TICK_FAILURES_TOTAL: &str = "smart_rule_tick_failures_total";
pub const RULES_ACTIVE: &str = "smart_rules_active";
pub const CMDLETS_GENERATED_TOTAL: &str = "smart_cmdlets_generated_total";
pub const CMDLETS_DISPATCHED_TOTAL: &str = "smart_cmdlets_dispatched_total";
pub const CMDLETS_REDELIVERED_TOTAL: &str = "smart_cmdlets_redelivered_total";
pub const CMDLETS_FINISHED_TOTAL: &str = "smart_cmdlets_finished_total";
pub const CMDLETS_PENDING: &str = "smart_cmdlets_pending";
pub const AGENTS_REGISTERED: &str = "smart_agents_registered";

/// 描述所有指标
pub fn describe_metrics() {
    describe_counter!(ACCESS_EVENTS_TOTAL, "Total number of file access events fetched");
    describe_counter!(
        ACCESS_EVENTS_REJECTED_TOTAL,
        "File access events rejected because the queue was full"
    );
    describe_counter!(
        ACCESS_COUNT_FAILOVER_TOTAL,
        "Access count persistence failures handled by failover"
    );

    describe_counter!(RULE_CHECKS_TOTAL, "Total number of rule checks");
    describe_counter!(RULE_TICK_FAILURES_TOTAL, "Total number of failed rule checks");
    describe_gauge!(RULES_ACTIVE, "Number of rules with a running timer");

    describe_counter!(CMDLETS_GENERATED_TOTAL, "Total number of cmdlets generated by rules");
    describe_counter!(CMDLETS_DISPATCHED_TOTAL, "Total number of cmdlet dispatches");
    describe_counter!(CMDLETS_REDELIVERED_TOTAL, "Cmdlets returned to the queue for redelivery");
    describe_counter!(CMDLETS_FINISHED_TOTAL, "Cmdlets reaching a terminal state");
    describe_gauge!(CMDLETS_PENDING, "Number of pending cmdlets");
    describe_gauge!(AGENTS_REGISTERED, "Number of registered agents");
}
