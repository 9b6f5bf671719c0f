//! Patch documents applied to the patchable view of a [`Resource`].
//!
//! The wire payload is opaque JSON whose shape selects the strategy:
//! an array is an RFC 6902 JSON Patch, an object is an RFC 7396 merge patch.
//! Both operate on the view `{spec, status, annotations, phase}`; `id`,
//! `kind` and `owner` are not reachable through a patch.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Map;
use serde_json::Value;

use super::empty_document;
use super::validate_documents;
use super::Resource;
use crate::ResourceError;
use crate::Result;

/// Top-level fields a patch may touch
pub const PATCHABLE_FIELDS: [&str; 4] = ["spec", "status", "annotations", "phase"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFormat {
    /// RFC 6902
    JsonPatch,
    /// RFC 7396
    MergePatch,
}

/// Merge algorithm applied to the patchable view.
pub trait PatchStrategy: Send + Sync + fmt::Debug {
    fn format(&self) -> PatchFormat;

    /// Rejects payloads this strategy cannot apply.
    fn validate(
        &self,
        payload: &Value,
    ) -> Result<()>;

    /// Applies `payload` to `view` in place. On error `view` is unspecified.
    fn apply(
        &self,
        view: &mut Value,
        payload: &Value,
    ) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPatchStrategy;

#[derive(Debug, Default, Clone, Copy)]
pub struct MergePatchStrategy;

static JSON_PATCH: JsonPatchStrategy = JsonPatchStrategy;
static MERGE_PATCH: MergePatchStrategy = MergePatchStrategy;

fn invalid(msg: impl Into<String>) -> crate::Error {
    ResourceError::InvalidArgument(msg.into()).into()
}

/// `path` targets one of the patchable fields or something below it.
fn is_patchable_path(path: &str) -> bool {
    PATCHABLE_FIELDS.iter().any(|field| {
        path.strip_prefix('/')
            .and_then(|rest| rest.strip_prefix(field))
            .map(|tail| tail.is_empty() || tail.starts_with('/'))
            .unwrap_or(false)
    })
}

impl JsonPatchStrategy {
    fn parse(payload: &Value) -> Result<json_patch::Patch> {
        serde_json::from_value(payload.clone()).map_err(|e| invalid(format!("invalid JSON Patch format: {e}")))
    }
}

impl PatchStrategy for JsonPatchStrategy {
    fn format(&self) -> PatchFormat {
        PatchFormat::JsonPatch
    }

    fn validate(
        &self,
        payload: &Value,
    ) -> Result<()> {
        let ops = payload
            .as_array()
            .ok_or_else(|| invalid("JSON Patch must be an array of operations"))?;
        if ops.is_empty() {
            return Err(invalid("JSON Patch contains no operations"));
        }
        for (index, op) in ops.iter().enumerate() {
            for pointer in ["path", "from"] {
                let Some(target) = op.get(pointer) else {
                    continue;
                };
                let target = target
                    .as_str()
                    .ok_or_else(|| invalid(format!("operation {index}: `{pointer}` must be a string")))?;
                if !is_patchable_path(target) {
                    return Err(invalid(format!(
                        "operation {index}: `{pointer}` {target:?} is outside /spec, /status, /annotations, /phase"
                    )));
                }
            }
        }
        Self::parse(payload).map(|_| ())
    }

    fn apply(
        &self,
        view: &mut Value,
        payload: &Value,
    ) -> Result<()> {
        let ops = Self::parse(payload)?;
        json_patch::patch(view, &ops).map_err(|e| invalid(format!("JSON Patch failed: {e}")))
    }
}

impl PatchStrategy for MergePatchStrategy {
    fn format(&self) -> PatchFormat {
        PatchFormat::MergePatch
    }

    fn validate(
        &self,
        payload: &Value,
    ) -> Result<()> {
        let fields = payload
            .as_object()
            .ok_or_else(|| invalid("merge patch must be a JSON object"))?;
        if fields.is_empty() {
            return Err(invalid("merge patch contains no fields"));
        }
        if let Some(unknown) = fields.keys().find(|k| !PATCHABLE_FIELDS.contains(&k.as_str())) {
            return Err(invalid(format!("field {unknown:?} cannot be patched")));
        }
        Ok(())
    }

    fn apply(
        &self,
        view: &mut Value,
        payload: &Value,
    ) -> Result<()> {
        json_patch::merge(view, payload);
        Ok(())
    }
}

/// A decoded, validated patch payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchDocument {
    format: PatchFormat,
    payload: Value,
}

impl PatchDocument {
    /// Decodes wire bytes, choosing the strategy from the payload shape.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(invalid("patch payload is empty"));
        }
        let payload: Value =
            serde_json::from_slice(bytes).map_err(|e| invalid(format!("patch payload is not valid JSON: {e}")))?;
        Self::from_value(payload)
    }

    pub fn from_value(payload: Value) -> Result<Self> {
        let format = match &payload {
            Value::Array(_) => PatchFormat::JsonPatch,
            Value::Object(_) => PatchFormat::MergePatch,
            _ => return Err(invalid("patch payload must be a JSON array or object")),
        };
        let doc = Self { format, payload };
        doc.strategy().validate(&doc.payload)?;
        Ok(doc)
    }

    /// Merge patch that replaces `status` and `phase`, the usual agent report.
    pub fn status_report(
        status: Value,
        phase: &str,
    ) -> Result<Self> {
        let mut fields = Map::new();
        fields.insert("status".into(), status);
        fields.insert("phase".into(), Value::String(phase.to_string()));
        Self::from_value(Value::Object(fields))
    }

    pub fn format(&self) -> PatchFormat {
        self.format
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn encode(&self) -> Vec<u8> {
        self.payload.to_string().into_bytes()
    }

    pub fn strategy(&self) -> &'static dyn PatchStrategy {
        match self.format {
            PatchFormat::JsonPatch => &JSON_PATCH,
            PatchFormat::MergePatch => &MERGE_PATCH,
        }
    }

    /// Applies the patch to a copy of `current`. The result keeps `id`,
    /// `kind` and `owner` of `current`; nothing is modified on error.
    pub fn apply_to(
        &self,
        current: &Resource,
    ) -> Result<Resource> {
        let mut view = patchable_view(current);
        self.strategy().apply(&mut view, &self.payload)?;
        rebuild(current, view)
    }
}

fn patchable_view(resource: &Resource) -> Value {
    let annotations: Map<String, Value> = resource
        .annotations
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut view = Map::new();
    view.insert("spec".into(), resource.spec.clone());
    view.insert("status".into(), resource.status.clone());
    view.insert("annotations".into(), Value::Object(annotations));
    view.insert("phase".into(), Value::String(resource.phase.clone()));
    Value::Object(view)
}

fn rebuild(
    current: &Resource,
    view: Value,
) -> Result<Resource> {
    let Value::Object(mut view) = view else {
        return Err(invalid("patch replaced the whole resource"));
    };
    if let Some(unknown) = view.keys().find(|k| !PATCHABLE_FIELDS.contains(&k.as_str())) {
        return Err(invalid(format!("field {unknown:?} cannot be patched")));
    }

    let annotations = match view.remove("annotations") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(entries)) => entries
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k, s)),
                other => Err(invalid(format!("annotation {k:?} must be a string, got {other}"))),
            })
            .collect::<Result<BTreeMap<_, _>>>()?,
        Some(other) => return Err(invalid(format!("annotations must be a map, got {other}"))),
    };

    let phase = match view.remove("phase") {
        Some(Value::String(phase)) => phase,
        Some(other) => return Err(invalid(format!("phase must be a string, got {other}"))),
        None => return Err(invalid("phase cannot be removed")),
    };

    let document = |value: Option<Value>| match value {
        None | Some(Value::Null) => empty_document(),
        Some(v) => v,
    };

    let patched = Resource {
        id: current.id.clone(),
        kind: current.kind.clone(),
        owner: current.owner.clone(),
        annotations,
        spec: document(view.remove("spec")),
        status: document(view.remove("status")),
        phase,
    };
    validate_documents(&patched)?;
    Ok(patched)
}
