//! JSON-RPC client for the modeling service.
//!
//! Every stage talks to the service through the [`ModelService`] trait so
//! tests can substitute an in-memory double. [`IpcClient`] is the real
//! implementation: plain JSON-RPC 2.0 over HTTP against a single endpoint.

use serde_json::{json, Map, Value};
use std::cell::Cell;

use crate::errors::ServiceError;
use crate::schema::{CalculationSetup, Flow, Process, Ref};

/// Remote object kinds the pipeline touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Process,
    Flow,
    ProductSystem,
    ImpactMethod,
}

impl ModelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Process => "Process",
            ModelType::Flow => "Flow",
            ModelType::ProductSystem => "ProductSystem",
            ModelType::ImpactMethod => "ImpactMethod",
        }
    }
}

/// Handle to a server-side calculation result or simulator session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
    pub id: String,
}

/// The result details exported per calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    TotalImpacts,
    TotalFlows,
    UpstreamOfImpactCategory,
    FlowsOfImpactCategory,
}

impl ExportKind {
    pub fn file_suffix(self) -> &'static str {
        match self {
            ExportKind::TotalImpacts => "total-impacts",
            ExportKind::TotalFlows => "total-flows",
            ExportKind::UpstreamOfImpactCategory => "upstream-of-impact-category",
            ExportKind::FlowsOfImpactCategory => "flows-of-impact-category",
        }
    }
}

/// Everything the pipeline needs from the modeling service. Getters return
/// `None` for missing objects; every other failure is a [`ServiceError`].
pub trait ModelService {
    fn get_process(&self, id: &str) -> Result<Option<Process>, ServiceError>;
    fn get_flow(&self, id: &str) -> Result<Option<Flow>, ServiceError>;
    fn find_descriptor(
        &self,
        model_type: ModelType,
        name: &str,
    ) -> Result<Option<Ref>, ServiceError>;
    fn insert_process(&self, process: &Process) -> Result<Ref, ServiceError>;
    fn delete(&self, model_type: ModelType, id: &str) -> Result<(), ServiceError>;
    fn create_product_system(&self, process_id: &str) -> Result<Ref, ServiceError>;
    fn get_product_system(&self, id: &str) -> Result<Option<Ref>, ServiceError>;
    fn calculate(&self, setup: &CalculationSetup) -> Result<ResultRef, ServiceError>;
    fn open_simulator(&self, setup: &CalculationSetup) -> Result<ResultRef, ServiceError>;
    fn next_simulation(&self, simulator: &ResultRef) -> Result<ResultRef, ServiceError>;
    fn dispose(&self, result: &ResultRef) -> Result<(), ServiceError>;
    /// Fetch one result detail wholesale (total impacts, total flows).
    fn fetch_result_detail(
        &self,
        kind: ExportKind,
        result: &ResultRef,
    ) -> Result<Value, ServiceError>;
    /// Build one result detail that requires a request per impact category.
    /// `total_impacts` is the payload a previous
    /// [`ExportKind::TotalImpacts`] fetch returned.
    fn derive_result_detail(
        &self,
        kind: ExportKind,
        result: &ResultRef,
        total_impacts: &Value,
    ) -> Result<Value, ServiceError>;
}

pub struct IpcClient {
    agent: ureq::Agent,
    endpoint: String,
    next_id: Cell<u64>,
}

impl IpcClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        IpcClient {
            agent: ureq::Agent::new_with_defaults(),
            endpoint: endpoint.into(),
            next_id: Cell::new(1),
        }
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, ServiceError> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let transport = |message: String| ServiceError::Transport {
            method: method.to_string(),
            message,
        };
        let mut response = self
            .agent
            .post(&self.endpoint)
            .send_json(&body)
            .map_err(|err| transport(err.to_string()))?;
        let envelope: Value = response
            .body_mut()
            .read_json()
            .map_err(|err| transport(err.to_string()))?;
        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(ServiceError::Remote {
                method: method.to_string(),
                message: error.to_string(),
            });
        }
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Like [`Self::call`] but treats a null result and the service's 404
    /// error as an absent object.
    fn call_optional(&self, method: &str, params: Value) -> Result<Option<Value>, ServiceError> {
        match self.call(method, params) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(ServiceError::Remote { message, .. }) if message.contains("404") => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        method: &str,
        value: Value,
    ) -> Result<T, ServiceError> {
        serde_json::from_value(value).map_err(|err| ServiceError::Remote {
            method: method.to_string(),
            message: format!("undecodable response: {err}"),
        })
    }

    fn result_ref(method: &str, value: Value) -> Result<ResultRef, ServiceError> {
        let id = value
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::Remote {
                method: method.to_string(),
                message: "response carries no '@id'".to_string(),
            })?;
        Ok(ResultRef { id: id.to_string() })
    }

    fn detail_method(kind: ExportKind) -> &'static str {
        match kind {
            ExportKind::TotalImpacts => "result/total-impacts",
            ExportKind::TotalFlows => "result/total-flows",
            ExportKind::UpstreamOfImpactCategory => "result/upstream-of-impact-category",
            ExportKind::FlowsOfImpactCategory => "result/flows-of-impact-category",
        }
    }
}

impl ModelService for IpcClient {
    fn get_process(&self, id: &str) -> Result<Option<Process>, ServiceError> {
        let method = "data/get";
        match self.call_optional(method, json!({"@type": "Process", "@id": id}))? {
            Some(value) => Ok(Some(Self::decode(method, value)?)),
            None => Ok(None),
        }
    }

    fn get_flow(&self, id: &str) -> Result<Option<Flow>, ServiceError> {
        let method = "data/get";
        match self.call_optional(method, json!({"@type": "Flow", "@id": id}))? {
            Some(value) => Ok(Some(Self::decode(method, value)?)),
            None => Ok(None),
        }
    }

    fn find_descriptor(
        &self,
        model_type: ModelType,
        name: &str,
    ) -> Result<Option<Ref>, ServiceError> {
        let method = "data/get";
        let params = json!({"@type": model_type.as_str(), "name": name});
        match self.call_optional(method, params)? {
            Some(value) => Ok(Some(Self::decode(method, value)?)),
            None => Ok(None),
        }
    }

    fn insert_process(&self, process: &Process) -> Result<Ref, ServiceError> {
        let method = "data/put";
        let mut body = serde_json::to_value(process).map_err(|err| ServiceError::Transport {
            method: method.to_string(),
            message: format!("unencodable process: {err}"),
        })?;
        if let Some(object) = body.as_object_mut() {
            object.insert("@type".to_string(), Value::String("Process".to_string()));
        }
        let value = self.call(method, body)?;
        Self::decode(method, value)
    }

    fn delete(&self, model_type: ModelType, id: &str) -> Result<(), ServiceError> {
        self.call(
            "data/delete",
            json!({"@type": model_type.as_str(), "@id": id}),
        )?;
        Ok(())
    }

    fn create_product_system(&self, process_id: &str) -> Result<Ref, ServiceError> {
        let method = "data/create-system";
        let params = json!({
            "process": {"@id": process_id},
            "config": {
                "providerLinking": "PREFER_DEFAULTS",
                "preferredType": "LCI_RESULT",
            },
        });
        let value = self.call(method, params)?;
        Self::decode(method, value)
    }

    fn get_product_system(&self, id: &str) -> Result<Option<Ref>, ServiceError> {
        let method = "data/get";
        let params = json!({"@type": "ProductSystem", "@id": id});
        match self.call_optional(method, params)? {
            Some(value) => Ok(Some(Self::decode(method, value)?)),
            None => Ok(None),
        }
    }

    fn calculate(&self, setup: &CalculationSetup) -> Result<ResultRef, ServiceError> {
        let method = "result/calculate";
        let params = serde_json::to_value(setup).map_err(|err| ServiceError::Transport {
            method: method.to_string(),
            message: format!("unencodable setup: {err}"),
        })?;
        let value = self.call(method, params)?;
        Self::result_ref(method, value)
    }

    fn open_simulator(&self, setup: &CalculationSetup) -> Result<ResultRef, ServiceError> {
        let method = "result/simulate";
        let params = serde_json::to_value(setup).map_err(|err| ServiceError::Transport {
            method: method.to_string(),
            message: format!("unencodable setup: {err}"),
        })?;
        let value = self.call(method, params)?;
        Self::result_ref(method, value)
    }

    fn next_simulation(&self, simulator: &ResultRef) -> Result<ResultRef, ServiceError> {
        let method = "result/simulate/next";
        let value = self.call(method, json!({"@id": simulator.id}))?;
        Self::result_ref(method, value)
    }

    fn dispose(&self, result: &ResultRef) -> Result<(), ServiceError> {
        self.call("result/dispose", json!({"@id": result.id}))?;
        Ok(())
    }

    fn fetch_result_detail(
        &self,
        kind: ExportKind,
        result: &ResultRef,
    ) -> Result<Value, ServiceError> {
        self.call(Self::detail_method(kind), json!({"@id": result.id}))
    }

    fn derive_result_detail(
        &self,
        kind: ExportKind,
        result: &ResultRef,
        total_impacts: &Value,
    ) -> Result<Value, ServiceError> {
        let method = Self::detail_method(kind);
        let items = total_impacts.as_array().cloned().unwrap_or_default();
        let mut details = Vec::with_capacity(items.len());
        for item in items {
            let category = item.get("impactCategory").cloned().unwrap_or(Value::Null);
            let params = json!({"@id": result.id, "impactCategory": category});
            let detail = self.call(method, params)?;
            let mut entry = Map::new();
            entry.insert("impactCategory".to_string(), category);
            entry.insert("result".to_string(), detail);
            details.push(Value::Object(entry));
        }
        Ok(Value::Array(details))
    }
}
