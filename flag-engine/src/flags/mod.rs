pub mod flag_match_reason;
pub mod flag_matching;
pub mod flag_models;
pub mod flag_operations;
pub mod flag_service;
pub mod flag_validation;
