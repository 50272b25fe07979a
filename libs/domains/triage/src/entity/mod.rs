pub mod eligible_record;
pub mod hospital;
pub mod triage_rule;
