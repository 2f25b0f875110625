use serde::Deserialize;

/// Envelope every paginated Karbon collection endpoint returns.
///
/// `value` holds the page's items; `@odata.nextLink` points at the next
/// page when there is one.
#[derive(Deserialize, Debug)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiPage<T> {
    #[serde(default)]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct Timesheet {
    pub user_key: Option<String>,
    #[serde(default)]
    pub time_entries: Vec<TimeEntry>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// A single logged duration against a client/task/work item.
///
/// The API exposes the work-item reference as `EntityKey` on some schema
/// versions and `WorkItemKey` on others; the alias accepts both so one
/// model covers every variant. Same deal for `ClientKey`/`ContactKey`.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct TimeEntry {
    #[serde(default, alias = "ContactKey")]
    pub client_key: Option<String>,
    #[serde(default, alias = "EntityKey")]
    pub work_item_key: Option<String>,
    pub task_type_name: Option<String>,
    pub minutes: Option<f64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct Contact {
    #[serde(default, alias = "ClientKey")]
    pub contact_key: Option<String>,
    #[serde(default, alias = "Name")]
    pub full_name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub user_key: Option<String>,
    pub name: Option<String>,
}

/// One budgeted-vs-actual row from an estimate summary. A work item can
/// carry any number of these, including zero.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct EstimateRow {
    pub estimate_minutes: Option<f64>,
    pub actual_minutes: Option<f64>,
}
