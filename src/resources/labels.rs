use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "ctf-ui-operator";

/// Labels put on every object the operator creates.
pub fn labels(app: &str, instance: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(app, instance);
    labels.insert("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string());
    labels
}

/// Subset of [`labels`] used to select pods
pub fn selector_labels(app: &str, instance: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), app.to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), instance.to_string());
    labels
}
