use wirelog::wirelog_test_case;

/// ITI-34 Retrieve Form.
#[wirelog_test_case(
    template = "templates/retrieve_form.xml",
    action = "urn:ihe:iti:2007:RetrieveForm",
    service = "FormManager",
    bind(formId = "formID", archiveUrl = "archiveURL")
)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveFormTest;

/// ITI-35 Submit Form.
#[wirelog_test_case(
    template = "templates/submit_form.xml",
    action = "urn:ihe:iti:2007:SubmitForm",
    service = "FormReceiver",
    bind(formId = "formID", instanceId = "instanceID", raw(content = "content"))
)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitFormTest;
