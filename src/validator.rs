//! Port configuration validation
//!
//! Checks a caller-supplied binding of data columns to input ports against a
//! method descriptor. Semantic mismatches are never errors: they are reported
//! as findings inside a [`ValidationResult`]. The check is a pure function of
//! its inputs, so identical inputs always yield identical findings in the
//! same order.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::descriptor::{DataType, MethodDescriptor, Port};

/// A concrete data column offered for a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Actual semantic type of the column
    #[serde(rename = "type")]
    pub data_type: DataType,

    /// Where the column comes from (e.g. dataset and column name)
    pub source: String,
}

impl ColumnDescriptor {
    pub fn new(data_type: DataType, source: impl Into<String>) -> Self {
        Self {
            data_type,
            source: source.into(),
        }
    }
}

/// Input port name -> columns bound to it, in caller order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortConfigMapping {
    pub ports: IndexMap<String, Vec<ColumnDescriptor>>,
}

impl PortConfigMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style binding of columns to a port
    pub fn bind(mut self, port: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        self.ports.insert(port.into(), columns);
        self
    }

    pub fn get(&self, port: &str) -> Option<&Vec<ColumnDescriptor>> {
        self.ports.get(port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    Ok,
    MissingRequired,
    TypeMismatch,
    CardinalityViolation,
    UnknownPort,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FindingKind::Ok => "OK",
            FindingKind::MissingRequired => "MISSING_REQUIRED",
            FindingKind::TypeMismatch => "TYPE_MISMATCH",
            FindingKind::CardinalityViolation => "CARDINALITY_VIOLATION",
            FindingKind::UnknownPort => "UNKNOWN_PORT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub port: String,
    pub kind: FindingKind,
    pub detail: String,
}

impl Finding {
    fn new(port: &str, kind: FindingKind, detail: impl Into<String>) -> Self {
        Self {
            port: port.to_string(),
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub findings: Vec<Finding>,
}

impl ValidationResult {
    /// Findings that are not OK
    pub fn problems(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.kind != FindingKind::Ok)
    }

    pub fn findings_for<'a>(&'a self, port: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.port == port)
    }
}

/// Validate `mapping` against the input ports of `descriptor`
pub fn validate(descriptor: &MethodDescriptor, mapping: &PortConfigMapping) -> ValidationResult {
    let mut findings = Vec::new();

    for port in &descriptor.inputs {
        check_port(port, mapping.get(&port.name), &mut findings);
    }

    for name in mapping.ports.keys() {
        if descriptor.input(name).is_none() {
            findings.push(Finding::new(
                name,
                FindingKind::UnknownPort,
                format!("method '{}' has no input port '{}'", descriptor.id, name),
            ));
        }
    }

    let valid = findings.iter().all(|f| f.kind == FindingKind::Ok);
    ValidationResult { valid, findings }
}

fn check_port(port: &Port, columns: Option<&Vec<ColumnDescriptor>>, findings: &mut Vec<Finding>) {
    let Some(columns) = columns else {
        if port.required {
            findings.push(Finding::new(
                &port.name,
                FindingKind::MissingRequired,
                "required port is not mapped",
            ));
        } else {
            findings.push(Finding::new(&port.name, FindingKind::Ok, "not mapped"));
        }
        return;
    };

    let before = findings.len();

    if !port.cardinality.admits(columns.len()) {
        findings.push(Finding::new(
            &port.name,
            FindingKind::CardinalityViolation,
            format!(
                "expects {} column(s), {} provided",
                port.cardinality,
                columns.len()
            ),
        ));
    }

    for column in columns {
        if !port.accepts(column.data_type) {
            findings.push(Finding::new(
                &port.name,
                FindingKind::TypeMismatch,
                format!(
                    "column '{}' is {}, port accepts {}",
                    column.source,
                    column.data_type,
                    accepted_types(port)
                ),
            ));
        }
    }

    if findings.len() == before {
        findings.push(Finding::new(&port.name, FindingKind::Ok, ""));
    }
}

fn accepted_types(port: &Port) -> String {
    port.types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Cardinality, MethodId, MethodStatus};
    use crate::store::ArtifactRef;

    fn port(name: &str, types: &[DataType], cardinality: Cardinality, required: bool) -> Port {
        Port {
            name: name.to_string(),
            types: types.to_vec(),
            cardinality,
            required,
        }
    }

    fn method(inputs: Vec<Port>) -> MethodDescriptor {
        MethodDescriptor {
            id: MethodId::from("M1"),
            name: "M1".to_string(),
            description: String::new(),
            inputs,
            outputs: Vec::new(),
            params: Vec::new(),
            artifact: ArtifactRef::for_bytes(b"M1"),
            status: MethodStatus::Active,
            created_at: chrono::Utc::now(),
        }
    }

    fn score_method() -> MethodDescriptor {
        method(vec![port(
            "score",
            &[DataType::Numeric],
            Cardinality::ExactlyOne,
            true,
        )])
    }

    fn kinds(result: &ValidationResult) -> Vec<(&str, FindingKind)> {
        result
            .findings
            .iter()
            .map(|f| (f.port.as_str(), f.kind))
            .collect()
    }

    // ==========================================================================
    // Single-port scenarios
    // ==========================================================================

    #[test]
    fn test_valid_mapping() {
        let mapping =
            PortConfigMapping::new().bind("score", vec![ColumnDescriptor::new(DataType::Numeric, "x")]);
        let result = validate(&score_method(), &mapping);
        assert!(result.valid);
        assert_eq!(kinds(&result), vec![("score", FindingKind::Ok)]);
    }

    #[test]
    fn test_empty_mapping_misses_required() {
        let result = validate(&score_method(), &PortConfigMapping::new());
        assert!(!result.valid);
        assert_eq!(kinds(&result), vec![("score", FindingKind::MissingRequired)]);
    }

    #[test]
    fn test_type_mismatch() {
        let mapping =
            PortConfigMapping::new().bind("score", vec![ColumnDescriptor::new(DataType::Nominal, "y")]);
        let result = validate(&score_method(), &mapping);
        assert!(!result.valid);
        assert_eq!(kinds(&result), vec![("score", FindingKind::TypeMismatch)]);
        assert!(result.findings[0].detail.contains("'y' is nominal"));
    }

    #[test]
    fn test_unknown_port_invalidates_otherwise_valid_mapping() {
        let mapping = PortConfigMapping::new()
            .bind("score", vec![ColumnDescriptor::new(DataType::Numeric, "x")])
            .bind("extra", vec![ColumnDescriptor::new(DataType::Numeric, "z")]);
        let result = validate(&score_method(), &mapping);
        assert!(!result.valid);
        assert_eq!(
            kinds(&result),
            vec![("score", FindingKind::Ok), ("extra", FindingKind::UnknownPort)]
        );
    }

    #[test]
    fn test_no_implicit_widening() {
        // Ordinal is not accepted where only numeric is declared
        let mapping =
            PortConfigMapping::new().bind("score", vec![ColumnDescriptor::new(DataType::Ordinal, "rank")]);
        assert!(!validate(&score_method(), &mapping).valid);

        let wide = method(vec![port(
            "score",
            &[DataType::Numeric, DataType::Ordinal],
            Cardinality::ExactlyOne,
            true,
        )]);
        assert!(validate(&wide, &mapping).valid);
    }

    // ==========================================================================
    // Cardinality
    // ==========================================================================

    #[test]
    fn test_exactly_one_rejects_two_columns() {
        let mapping = PortConfigMapping::new().bind(
            "score",
            vec![
                ColumnDescriptor::new(DataType::Numeric, "a"),
                ColumnDescriptor::new(DataType::Numeric, "b"),
            ],
        );
        let result = validate(&score_method(), &mapping);
        assert_eq!(kinds(&result), vec![("score", FindingKind::CardinalityViolation)]);
    }

    #[test]
    fn test_empty_column_list_violates_cardinality() {
        let many = method(vec![port("cols", &[DataType::Text], Cardinality::OneOrMore, false)]);
        let mapping = PortConfigMapping::new().bind("cols", Vec::new());
        let result = validate(&many, &mapping);
        assert!(!result.valid);
        assert_eq!(kinds(&result), vec![("cols", FindingKind::CardinalityViolation)]);
    }

    #[test]
    fn test_cardinality_and_type_findings_are_ordered() {
        let mapping = PortConfigMapping::new().bind(
            "score",
            vec![
                ColumnDescriptor::new(DataType::Date, "when"),
                ColumnDescriptor::new(DataType::Numeric, "ok"),
                ColumnDescriptor::new(DataType::Text, "label"),
            ],
        );
        let result = validate(&score_method(), &mapping);
        assert_eq!(
            kinds(&result),
            vec![
                ("score", FindingKind::CardinalityViolation),
                ("score", FindingKind::TypeMismatch),
                ("score", FindingKind::TypeMismatch),
            ]
        );
        assert!(result.findings[1].detail.contains("'when'"));
        assert!(result.findings[2].detail.contains("'label'"));
    }

    // ==========================================================================
    // Ordering, optional ports and determinism
    // ==========================================================================

    #[test]
    fn test_findings_follow_declaration_then_mapping_order() {
        let descriptor = method(vec![
            port("b", &[DataType::Numeric], Cardinality::ExactlyOne, true),
            port("a", &[DataType::Nominal], Cardinality::OneOrMore, false),
            port("c", &[DataType::Date], Cardinality::ExactlyOne, true),
        ]);
        let mapping = PortConfigMapping::new()
            .bind("zz", Vec::new())
            .bind("c", vec![ColumnDescriptor::new(DataType::Date, "d")])
            .bind("aa", Vec::new());
        let result = validate(&descriptor, &mapping);
        assert_eq!(
            kinds(&result),
            vec![
                ("b", FindingKind::MissingRequired),
                ("a", FindingKind::Ok),
                ("c", FindingKind::Ok),
                ("zz", FindingKind::UnknownPort),
                ("aa", FindingKind::UnknownPort),
            ]
        );
        assert_eq!(result.problems().count(), 3);
        assert_eq!(result.findings_for("a").next().unwrap().detail, "not mapped");
    }

    #[test]
    fn test_validation_is_deterministic() {
        let mapping = PortConfigMapping::new()
            .bind("extra", Vec::new())
            .bind("score", vec![ColumnDescriptor::new(DataType::Nominal, "y")]);
        let descriptor = score_method();
        let first = serde_json::to_vec(&validate(&descriptor, &mapping)).unwrap();
        let second = serde_json::to_vec(&validate(&descriptor, &mapping)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mapping_json_preserves_order() {
        let mapping: PortConfigMapping = serde_json::from_str(
            r#"{"zeta": [{"type": "numeric", "source": "t.a"}], "alpha": []}"#,
        )
        .unwrap();
        let keys: Vec<&str> = mapping.ports.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(mapping.get("zeta").unwrap()[0].data_type, DataType::Numeric);
    }

    #[test]
    fn test_result_serializes_kind_names() {
        let result = validate(&score_method(), &PortConfigMapping::new());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["valid"], serde_json::json!(false));
        assert_eq!(json["findings"][0]["kind"], serde_json::json!("MISSING_REQUIRED"));
    }
}
