mod form_manager;
mod test_cases;

pub use form_manager::{InMemoryFormManager, Submission, RETRIEVE_FORM_ACTION, SUBMIT_FORM_ACTION};
pub use test_cases::{RetrieveFormTest, SubmitFormTest};
