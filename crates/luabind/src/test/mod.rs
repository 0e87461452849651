// Test module organization
pub mod test_custom_type;
pub mod test_function;
pub mod test_stack;
pub mod test_value;
