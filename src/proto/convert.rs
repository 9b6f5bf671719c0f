//! Conversions between wire messages and the resource model.
//!
//! `spec` and `status` travel as `google.protobuf.Struct`, whose only number
//! type is a double: integral values within `i64` range decode back to JSON
//! integers.

use prost_types::value::Kind;
use prost_types::ListValue;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;

use super::controllerapi as pb;
use crate::empty_document;
use crate::ChangeEvent;
use crate::Document;
use crate::OwnerRef;
use crate::Resource;
use crate::ResourceError;
use crate::Result;
use crate::WatchAction;
use crate::WatchRequest;

pub fn value_to_proto(value: Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(value_to_proto).collect(),
        }),
        Value::Object(fields) => Kind::StructValue(map_to_struct(fields)),
    };
    prost_types::Value { kind: Some(kind) }
}

pub fn value_from_proto(value: prost_types::Value) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::NumberValue(n)) => number_from_f64(n),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(list.values.into_iter().map(value_from_proto).collect()),
        Some(Kind::StructValue(s)) => struct_to_document(s),
    }
}

fn number_from_f64(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn map_to_struct(fields: Map<String, Value>) -> prost_types::Struct {
    prost_types::Struct {
        fields: fields.into_iter().map(|(k, v)| (k, value_to_proto(v))).collect(),
    }
}

/// Map documents become a `Struct`; any other document becomes an empty one.
pub fn document_to_struct(doc: Document) -> prost_types::Struct {
    match doc {
        Value::Object(fields) => map_to_struct(fields),
        _ => prost_types::Struct::default(),
    }
}

pub fn struct_to_document(s: prost_types::Struct) -> Document {
    Value::Object(s.fields.into_iter().map(|(k, v)| (k, value_from_proto(v))).collect())
}

impl From<OwnerRef> for pb::Owner {
    fn from(owner: OwnerRef) -> Self {
        pb::Owner {
            kind: owner.kind,
            id: owner.id,
        }
    }
}

impl From<pb::Owner> for OwnerRef {
    fn from(owner: pb::Owner) -> Self {
        OwnerRef::new(owner.kind, owner.id)
    }
}

impl From<Resource> for pb::Resource {
    fn from(r: Resource) -> Self {
        pb::Resource {
            id: r.id,
            kind: r.kind,
            annotations: r.annotations.into_iter().collect(),
            owner: r.owner.map(Into::into),
            spec: Some(document_to_struct(r.spec)),
            status: Some(document_to_struct(r.status)),
            phase: r.phase,
        }
    }
}

impl From<pb::Resource> for Resource {
    fn from(r: pb::Resource) -> Self {
        Resource {
            id: r.id,
            kind: r.kind,
            annotations: r.annotations.into_iter().collect(),
            owner: r.owner.map(Into::into),
            spec: r.spec.map(struct_to_document).unwrap_or_else(empty_document),
            status: r.status.map(struct_to_document).unwrap_or_else(empty_document),
            phase: r.phase,
        }
    }
}

impl From<WatchAction> for pb::WatchAction {
    fn from(action: WatchAction) -> Self {
        match action {
            WatchAction::Create => pb::WatchAction::Create,
            WatchAction::Update => pb::WatchAction::Update,
            WatchAction::Delete => pb::WatchAction::Delete,
            WatchAction::All => pb::WatchAction::All,
        }
    }
}

impl From<pb::WatchAction> for WatchAction {
    fn from(action: pb::WatchAction) -> Self {
        match action {
            pb::WatchAction::Create => WatchAction::Create,
            pb::WatchAction::Update => WatchAction::Update,
            pb::WatchAction::Delete => WatchAction::Delete,
            pb::WatchAction::All => WatchAction::All,
        }
    }
}

pub fn action_from_i32(raw: i32) -> Result<WatchAction> {
    pb::WatchAction::try_from(raw)
        .map(Into::into)
        .map_err(|_| ResourceError::InvalidArgument(format!("unknown watch action {raw}")).into())
}

impl From<ChangeEvent> for pb::WatchResponse {
    fn from(event: ChangeEvent) -> Self {
        pb::WatchResponse {
            resource: Some(event.resource.into()),
            prev_resource: event.prev_resource.map(Into::into),
            action: pb::WatchAction::from(event.action) as i32,
            revision: event.revision,
        }
    }
}

impl TryFrom<pb::WatchResponse> for ChangeEvent {
    type Error = crate::Error;

    fn try_from(resp: pb::WatchResponse) -> Result<Self> {
        let resource = resp
            .resource
            .ok_or_else(|| ResourceError::InvalidArgument("watch response without resource".into()))?;
        Ok(ChangeEvent {
            revision: resp.revision,
            action: action_from_i32(resp.action)?,
            resource: resource.into(),
            prev_resource: resp.prev_resource.map(Into::into),
        })
    }
}

impl From<WatchRequest> for pb::WatchRequest {
    fn from(req: WatchRequest) -> Self {
        pb::WatchRequest {
            kind: req.kind,
            id: req.id,
            owner: req.owner.map(Into::into),
            action: pb::WatchAction::from(req.action) as i32,
            start_revision: req.start_revision,
        }
    }
}

impl TryFrom<pb::WatchRequest> for WatchRequest {
    type Error = crate::Error;

    fn try_from(req: pb::WatchRequest) -> Result<Self> {
        Ok(WatchRequest {
            kind: req.kind,
            id: req.id,
            owner: req.owner.map(Into::into),
            action: action_from_i32(req.action)?,
            start_revision: req.start_revision,
        })
    }
}
