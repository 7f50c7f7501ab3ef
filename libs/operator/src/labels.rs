//! Operator label stamping: app name/value, operator version, commit, build
//! date (colons substituted by dots). Shared by object creation and
//! `selflabel`.
use std::collections::BTreeMap;

pub const LABEL_APP: &str = "app.kubernetes.io/name";
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";
pub const LABEL_COMMIT: &str = "clickhouse.altinity.com/commit";
pub const LABEL_BUILD_DATE: &str = "clickhouse.altinity.com/build-date";

pub const APP_NAME: &str = "chop-operator";

/// Operator version/commit/build-date, process-wide read-mostly state:
/// constructed once, threaded explicitly, never read from a global.
#[derive(Clone, Debug)]
pub struct OperatorBuildInfo {
    pub version: String,
    pub commit: String,
    pub build_date: String,
}

impl OperatorBuildInfo {
    pub fn from_env() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            commit: option_env!("CHOP_OPERATOR_COMMIT").unwrap_or("unknown").to_owned(),
            build_date: option_env!("CHOP_OPERATOR_BUILD_DATE")
                .unwrap_or("unknown")
                .to_owned(),
        }
    }
}

/// `:` → `.`: Kubernetes label values forbid `:`.
fn sanitize_label_value(value: &str) -> String {
    value.replace(':', ".")
}

pub fn stamp_operator_labels(labels: &mut BTreeMap<String, String>, info: &OperatorBuildInfo) {
    labels.insert(LABEL_APP.to_owned(), APP_NAME.to_owned());
    labels.insert(LABEL_VERSION.to_owned(), sanitize_label_value(&info.version));
    labels.insert(LABEL_COMMIT.to_owned(), sanitize_label_value(&info.commit));
    labels.insert(
        LABEL_BUILD_DATE.to_owned(),
        sanitize_label_value(&info.build_date),
    );
}
