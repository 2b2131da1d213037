//! Declarative response mappings.
//!
//! Provider responses are reduced to data: a [`BalanceMappingSpec`] names
//! the JSON fields holding the success flag, error message and balance
//! amounts, and [`BalanceMapping::compile`] validates it once when the
//! registry is built. Field paths are dotted (`data.total_tokens`);
//! numeric segments index arrays (`balance_infos.0.total_balance`). List
//! paths for model ids use `[]` to mark the array (`data.models[].model_name`).

use serde_json::{Map, Value};

use apiwallet_vault::NormalizedQuota;

// ---------------------------------------------------------------------------
// Field paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed dotted path into a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("empty field path".into());
        }
        let segments = raw
            .split('.')
            .map(|seg| {
                if seg.is_empty() {
                    Err(format!("empty segment in field path `{raw}`"))
                } else if let Ok(index) = seg.parse::<usize>() {
                    Ok(Segment::Index(index))
                } else {
                    Ok(Segment::Key(seg.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Resolve the path. `null` counts as absent.
    pub fn lookup<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
                (Segment::Key(k), Value::Object(map)) => map.get(k)?,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }

    /// Resolve the path as a number, accepting numeric strings.
    pub fn number(&self, root: &Value) -> Option<f64> {
        self.lookup(root).and_then(as_number)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A path to a list of items plus a path inside each item, written
/// `list[].item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPath {
    list: FieldPath,
    item: FieldPath,
}

impl ListPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (list, item) = raw
            .split_once("[].")
            .ok_or_else(|| format!("list path `{raw}` must look like `items[].field`"))?;
        Ok(Self {
            list: FieldPath::parse(list)?,
            item: FieldPath::parse(item)?,
        })
    }

    /// Collect every item's value as text. Items without the field are
    /// skipped. `None` if the list itself is missing.
    pub fn collect(&self, root: &Value) -> Option<Vec<String>> {
        let items = self.list.lookup(root)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|item| self.item.lookup(item))
                .map(as_text)
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Static specs
// ---------------------------------------------------------------------------

/// A literal a success field is compared against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expected {
    Int(i64),
    Bool(bool),
    Str(&'static str),
}

impl Expected {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Int(want), v) => as_number(v).is_some_and(|n| n == *want as f64),
            (Self::Bool(want), Value::Bool(b)) => b == want,
            (Self::Str(want), Value::String(s)) => s == *want,
            _ => false,
        }
    }
}

/// How to tell an application-level success from an error in a 2xx body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuccessSpec {
    Always,
    FieldEquals(&'static str, Expected),
    FieldAbsent(&'static str),
}

/// Where the reset description comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResetSpec {
    Fixed(&'static str),
    Field {
        path: &'static str,
        fallback: &'static str,
    },
}

/// Per-provider balance response mapping, as written in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceMappingSpec {
    pub success: SuccessSpec,
    /// Checked in order; the first present field is the error message.
    pub error_message: &'static [&'static str],
    pub remaining: Option<&'static str>,
    pub total: Option<&'static str>,
    pub used: Option<&'static str>,
    pub reset: ResetSpec,
    /// `(extra name, field path)` pairs copied verbatim when present.
    pub extras: &'static [(&'static str, &'static str)],
    /// Unit of the amounts, recorded as the `unit` extra.
    pub unit: Option<&'static str>,
}

// ---------------------------------------------------------------------------
// Compiled mapping
// ---------------------------------------------------------------------------

const UNIT_EXTRA: &str = "unit";

#[derive(Debug, Clone)]
enum SuccessRule {
    Always,
    FieldEquals(FieldPath, Expected),
    FieldAbsent(FieldPath),
}

#[derive(Debug, Clone)]
enum ResetRule {
    Fixed(String),
    Field { path: FieldPath, fallback: String },
}

/// A validated [`BalanceMappingSpec`].
#[derive(Debug, Clone)]
pub struct BalanceMapping {
    success: SuccessRule,
    error_message: Vec<FieldPath>,
    remaining: Option<FieldPath>,
    total: Option<FieldPath>,
    used: Option<FieldPath>,
    reset: ResetRule,
    extras: Vec<(String, FieldPath)>,
    unit: Option<String>,
}

impl BalanceMapping {
    /// Validate `spec`: every path must parse, at least one of remaining
    /// or total must be mapped, and extra names must be unique.
    pub fn compile(spec: &BalanceMappingSpec) -> Result<Self, String> {
        let opt = |p: Option<&str>| p.map(FieldPath::parse).transpose();

        let success = match spec.success {
            SuccessSpec::Always => SuccessRule::Always,
            SuccessSpec::FieldEquals(path, expected) => {
                SuccessRule::FieldEquals(FieldPath::parse(path)?, expected)
            }
            SuccessSpec::FieldAbsent(path) => SuccessRule::FieldAbsent(FieldPath::parse(path)?),
        };

        let remaining = opt(spec.remaining)?;
        let total = opt(spec.total)?;
        if remaining.is_none() && total.is_none() {
            return Err("mapping must name a remaining or total field".into());
        }

        let reset = match spec.reset {
            ResetSpec::Fixed(text) => ResetRule::Fixed(text.to_string()),
            ResetSpec::Field { path, fallback } => ResetRule::Field {
                path: FieldPath::parse(path)?,
                fallback: fallback.to_string(),
            },
        };

        let mut extras: Vec<(String, FieldPath)> = Vec::with_capacity(spec.extras.len());
        for (name, path) in spec.extras {
            let clashes_with_unit = spec.unit.is_some() && *name == UNIT_EXTRA;
            if name.is_empty()
                || clashes_with_unit
                || extras.iter().any(|(n, _)| n.as_str() == *name)
            {
                return Err(format!("extra field name `{name}` is empty or duplicated"));
            }
            extras.push((name.to_string(), FieldPath::parse(path)?));
        }

        Ok(Self {
            success,
            error_message: spec
                .error_message
                .iter()
                .map(|p| FieldPath::parse(p))
                .collect::<Result<_, _>>()?,
            remaining,
            total,
            used: opt(spec.used)?,
            reset,
            extras,
            unit: spec.unit.map(str::to_string),
        })
    }

    /// Whether a 2xx body reports application-level success.
    pub fn is_success(&self, body: &Value) -> bool {
        match &self.success {
            SuccessRule::Always => true,
            SuccessRule::FieldEquals(path, expected) => {
                path.lookup(body).is_some_and(|v| expected.matches(v))
            }
            SuccessRule::FieldAbsent(path) => path.lookup(body).is_none(),
        }
    }

    /// The provider's error message, if the body carries one.
    pub fn error_message(&self, body: &Value) -> Option<String> {
        self.error_message
            .iter()
            .find_map(|path| path.lookup(body))
            .map(as_text)
            .filter(|m| !m.is_empty())
    }

    /// Map a successful body into a [`NormalizedQuota`].
    ///
    /// Missing amounts are derived from the others: remaining = total −
    /// used, total = remaining + used, used = total − remaining (floored at
    /// zero). Fails only if no amount at all could be read.
    pub fn normalize(&self, body: &Value) -> Result<NormalizedQuota, String> {
        let read = |p: &Option<FieldPath>| p.as_ref().and_then(|p| p.number(body));
        let (remaining, total, used) = (read(&self.remaining), read(&self.total), read(&self.used));

        if remaining.is_none() && total.is_none() {
            let expected: Vec<&str> = [&self.remaining, &self.total]
                .into_iter()
                .flatten()
                .map(FieldPath::as_str)
                .collect();
            return Err(format!(
                "response carries none of the balance fields {}",
                expected.join(", ")
            ));
        }

        let total_value = total.or_else(|| remaining.map(|r| r + used.unwrap_or(0.0)));
        let remaining_value =
            remaining.or_else(|| total.map(|t| (t - used.unwrap_or(0.0)).max(0.0)));
        let used_value = used
            .or_else(|| match (total, remaining) {
                (Some(t), Some(r)) => Some((t - r).max(0.0)),
                _ => None,
            })
            .unwrap_or(0.0);

        let reset = match &self.reset {
            ResetRule::Fixed(text) => text.clone(),
            ResetRule::Field { path, fallback } => path
                .lookup(body)
                .map(as_text)
                .unwrap_or_else(|| fallback.clone()),
        };

        let mut extras = Map::new();
        for (name, path) in &self.extras {
            if let Some(value) = path.lookup(body) {
                extras.insert(name.clone(), value.clone());
            }
        }
        if let Some(unit) = &self.unit {
            extras.insert(UNIT_EXTRA.into(), Value::String(unit.clone()));
        }

        Ok(NormalizedQuota::new(
            remaining_value.unwrap_or(0.0),
            total_value.unwrap_or(0.0),
            used_value,
            reset,
            extras,
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EMPTY: &[(&str, &str)] = &[];

    fn spec(
        remaining: Option<&'static str>,
        total: Option<&'static str>,
        used: Option<&'static str>,
    ) -> BalanceMappingSpec {
        BalanceMappingSpec {
            success: SuccessSpec::Always,
            error_message: &[],
            remaining,
            total,
            used,
            reset: ResetSpec::Fixed("unknown"),
            extras: EMPTY,
            unit: None,
        }
    }

    #[test]
    fn field_path_lookup() {
        let body = json!({"balance_infos": [{"total_balance": "110.00"}], "a": {"0": 5}});
        let path = FieldPath::parse("balance_infos.0.total_balance").unwrap();
        assert_eq!(path.number(&body), Some(110.0));
        assert_eq!(FieldPath::parse("a.0").unwrap().number(&body), Some(5.0));
        assert!(FieldPath::parse("balance_infos.1.total_balance").unwrap().lookup(&body).is_none());
    }

    #[test]
    fn field_path_null_is_absent() {
        let body = json!({"error": null});
        assert!(FieldPath::parse("error").unwrap().lookup(&body).is_none());
    }

    #[test]
    fn field_path_rejects_empty_segments() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("data..x").is_err());
    }

    #[test]
    fn non_numeric_strings_are_not_numbers() {
        let body = json!({"x": "abc", "y": "NaN", "z": true});
        for p in ["x", "y", "z"] {
            assert_eq!(FieldPath::parse(p).unwrap().number(&body), None);
        }
    }

    #[test]
    fn list_path_collects_ids() {
        let body = json!({"data": {"models": [{"model_name": "glm-4"}, {"other": 1}, {"model_name": "glm-4-air"}]}});
        let path = ListPath::parse("data.models[].model_name").unwrap();
        assert_eq!(path.collect(&body).unwrap(), vec!["glm-4", "glm-4-air"]);
        assert!(path.collect(&json!({})).is_none());
        assert!(ListPath::parse("data.id").is_err());
    }

    #[test]
    fn compile_requires_an_amount() {
        assert!(BalanceMapping::compile(&spec(None, None, Some("used"))).is_err());
    }

    #[test]
    fn compile_rejects_duplicate_extras() {
        let mut s = spec(Some("r"), None, None);
        s.extras = &[("a", "x"), ("a", "y")];
        assert!(BalanceMapping::compile(&s).is_err());
    }

    #[test]
    fn unit_is_recorded_and_reserved() {
        let mut s = spec(Some("r"), None, None);
        s.unit = Some("CNY");
        let m = BalanceMapping::compile(&s).unwrap();
        let q = m.normalize(&json!({"r": 1})).unwrap();
        assert_eq!(q.provider_extras()["unit"], "CNY");

        s.extras = &[("unit", "u")];
        assert!(BalanceMapping::compile(&s).is_err());
    }

    #[test]
    fn derives_remaining_from_total_and_used() {
        let m = BalanceMapping::compile(&spec(None, Some("t"), Some("u"))).unwrap();
        let q = m.normalize(&json!({"t": 1000, "u": 250})).unwrap();
        assert_eq!(q.remaining_tokens(), 750.0);
        assert!((q.used_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn derives_total_from_remaining_and_used() {
        let m = BalanceMapping::compile(&spec(Some("r"), None, Some("u"))).unwrap();
        let q = m.normalize(&json!({"r": 30, "u": "10"})).unwrap();
        assert_eq!(q.total_tokens(), 40.0);
    }

    #[test]
    fn derives_used_floored_at_zero() {
        let m = BalanceMapping::compile(&spec(Some("r"), Some("t"), None)).unwrap();
        let q = m.normalize(&json!({"r": 50, "t": 40})).unwrap();
        assert_eq!(q.used_tokens(), 0.0);
        assert_eq!(q.used_ratio(), 0.0);
    }

    #[test]
    fn missing_amounts_fail() {
        let m = BalanceMapping::compile(&spec(Some("r"), Some("t"), None)).unwrap();
        let err = m.normalize(&json!({"other": 1})).unwrap_err();
        assert!(err.contains("r, t"));
    }

    #[test]
    fn success_rules() {
        let mut s = spec(Some("r"), None, None);
        s.success = SuccessSpec::FieldEquals("code", Expected::Int(0));
        let m = BalanceMapping::compile(&s).unwrap();
        assert!(m.is_success(&json!({"code": 0})));
        assert!(m.is_success(&json!({"code": "0"})));
        assert!(!m.is_success(&json!({"code": 401})));
        assert!(!m.is_success(&json!({})));

        s.success = SuccessSpec::FieldAbsent("error");
        let m = BalanceMapping::compile(&s).unwrap();
        assert!(m.is_success(&json!({"error": null})));
        assert!(!m.is_success(&json!({"error": {"message": "bad"}})));

        s.success = SuccessSpec::FieldEquals("success", Expected::Bool(true));
        let m = BalanceMapping::compile(&s).unwrap();
        assert!(!m.is_success(&json!({"success": false})));
    }

    #[test]
    fn error_message_first_present_path() {
        let mut s = spec(Some("r"), None, None);
        s.error_message = &["error.message", "msg"];
        let m = BalanceMapping::compile(&s).unwrap();
        assert_eq!(m.error_message(&json!({"msg": "quota"})).as_deref(), Some("quota"));
        assert_eq!(
            m.error_message(&json!({"error": {"message": "auth"}, "msg": "x"})).as_deref(),
            Some("auth")
        );
        assert_eq!(m.error_message(&json!({})), None);
    }

    #[test]
    fn reset_and_extras() {
        let mut s = spec(Some("r"), None, None);
        s.reset = ResetSpec::Field {
            path: "reset_at",
            fallback: "unknown",
        };
        s.extras = &[("currency", "cur"), ("missing", "nope")];
        let m = BalanceMapping::compile(&s).unwrap();

        let q = m.normalize(&json!({"r": 1, "cur": "CNY", "reset_at": "monthly"})).unwrap();
        assert_eq!(q.reset_description(), "monthly");
        assert_eq!(q.provider_extras().get("currency"), Some(&json!("CNY")));
        assert!(q.provider_extras().get("missing").is_none());

        let q = m.normalize(&json!({"r": 1})).unwrap();
        assert_eq!(q.reset_description(), "unknown");
    }
}
