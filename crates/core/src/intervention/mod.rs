pub mod escalation;
pub mod guidance;
pub mod machine;
