//! Recipe document schema.
//!
//! The schema is a fixed data contract: `IMG_NAME` and `fillings` are
//! required, documented keys have fixed types, and unknown keys pass
//! through untouched for the pipeline config.

use serde_json::{Map, Value};

/// JSON type a schema property must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Number,
    /// Array of stage identifiers.
    StageList,
    /// Array of filling objects.
    Fillings,
}

impl Kind {
    fn describe(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Number => "number",
            Kind::StageList => "array of stage names",
            Kind::Fillings => "array of filling objects",
        }
    }
}

/// Top-level recipe properties.
pub const RECIPE_PROPERTIES: &[(&str, Kind)] = &[
    ("IMG_NAME", Kind::String),
    ("APT_PROXY", Kind::String),
    ("BASE_DIR", Kind::String),
    ("WORK_DIR", Kind::String),
    ("DEPLOY_DIR", Kind::String),
    ("DEPLOY_ZIP", Kind::Number),
    ("USE_QEMU", Kind::String),
    ("LOCALE_DEFAULT", Kind::String),
    ("HOSTNAME", Kind::String),
    ("KEYBOARD_KEYMAP", Kind::String),
    ("KEYBOARD_LAYOUT", Kind::String),
    ("TIMEZONE_DEFAULT", Kind::String),
    ("FIRST_USER_NAME", Kind::String),
    ("FIRST_USER_PASS", Kind::String),
    ("WPA_ESSID", Kind::String),
    ("WPA_PASSWORD", Kind::String),
    ("WPA_COUNTRY", Kind::String),
    ("ENABLE_SSH", Kind::Number),
    ("STAGE_LIST", Kind::String),
    ("skip_image", Kind::StageList),
    ("skip_stage", Kind::StageList),
    ("skip_noobs", Kind::StageList),
    ("output_dir", Kind::String),
    ("offline_mode", Kind::Number),
    ("fillings", Kind::Fillings),
];

pub const RECIPE_REQUIRED: &[&str] = &["IMG_NAME", "fillings"];

/// Properties of one entry in `fillings`.
pub const FILLING_PROPERTIES: &[(&str, Kind)] = &[
    ("name", Kind::String),
    ("git_url", Kind::String),
    ("git_tag", Kind::String),
    ("ssh_key", Kind::String),
    ("run_priority", Kind::Number),
];

pub const FILLING_REQUIRED: &[&str] = &["name", "run_priority"];

/// One schema violation, addressed by a JSON path such as
/// `fillings[2].run_priority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed recipe document. Returns every violation found.
pub fn validate(doc: &Value) -> Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    let Some(root) = doc.as_object() else {
        violations.push(Violation::new("$", format!("expected object, found {}", type_name(doc))));
        return Err(violations);
    };

    check_object(root, "", RECIPE_PROPERTIES, RECIPE_REQUIRED, &mut violations);

    if let Some(Value::Array(fillings)) = root.get("fillings") {
        for (i, entry) in fillings.iter().enumerate() {
            let path = format!("fillings[{}]", i);
            match entry.as_object() {
                Some(filling) => {
                    check_object(
                        filling,
                        &format!("{}.", path),
                        FILLING_PROPERTIES,
                        FILLING_REQUIRED,
                        &mut violations,
                    );
                    if let Some(Value::String(name)) = filling.get("name") {
                        if !is_path_component(name) {
                            violations.push(Violation::new(
                                format!("{}.name", path),
                                format!("'{}' must be a plain directory name", name),
                            ));
                        }
                    }
                }
                None => violations.push(Violation::new(
                    path,
                    format!("expected object, found {}", type_name(entry)),
                )),
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check_object(
    object: &Map<String, Value>,
    prefix: &str,
    properties: &[(&str, Kind)],
    required: &[&str],
    violations: &mut Vec<Violation>,
) {
    for key in required {
        if !object.contains_key(*key) {
            violations.push(Violation::new(
                format!("{}{}", prefix, key),
                "required property is missing",
            ));
        }
    }

    for (key, kind) in properties {
        let Some(value) = object.get(*key) else {
            continue;
        };
        let path = format!("{}{}", prefix, key);
        if !matches_kind(value, *kind) {
            violations.push(Violation::new(
                &path,
                format!("expected {}, found {}", kind.describe(), type_name(value)),
            ));
            continue;
        }
        if *kind == Kind::StageList {
            for (i, stage) in value.as_array().into_iter().flatten().enumerate() {
                match stage.as_str() {
                    Some(s) if is_path_component(s) => {}
                    Some(s) => violations.push(Violation::new(
                        format!("{}[{}]", path, i),
                        format!("'{}' is not a stage directory name", s),
                    )),
                    None => violations.push(Violation::new(
                        format!("{}[{}]", path, i),
                        format!("expected string, found {}", type_name(stage)),
                    )),
                }
            }
        }
    }
}

fn matches_kind(value: &Value, kind: Kind) -> bool {
    match kind {
        Kind::String => value.is_string(),
        Kind::Number => value.is_number(),
        Kind::StageList | Kind::Fillings => value.is_array(),
    }
}

/// Names used as directories under the pipeline or fillings root must not
/// escape it.
fn is_path_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
