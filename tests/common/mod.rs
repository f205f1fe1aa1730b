//! In-memory stand-in for the modeling service plus the standard two-process
//! fixture the stage tests run against.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use lcautomate::errors::ServiceError;
use lcautomate::ipc::{ExportKind, ModelService, ModelType, ResultRef};
use lcautomate::schema::{CalculationSetup, Exchange, Flow, Process, Ref};

#[derive(Default)]
pub struct MockService {
    pub processes: RefCell<BTreeMap<String, Process>>,
    pub flows: RefCell<BTreeMap<String, Flow>>,
    pub systems: RefCell<BTreeMap<String, Ref>>,
    pub impact_methods: RefCell<Vec<Ref>>,
    pub inserts: Cell<usize>,
    pub deletes: Cell<usize>,
    pub systems_created: Cell<usize>,
    pub calculations: Cell<usize>,
    pub simulations: Cell<usize>,
    pub open_simulators: Cell<usize>,
    pub disposed: RefCell<Vec<String>>,
    /// When set, inserts fail once this many have succeeded.
    pub fail_inserts_after: Cell<Option<usize>>,
    next_id: Cell<u64>,
}

impl MockService {
    fn fresh_id(&self, prefix: &str) -> String {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        format!("{prefix}-{id}")
    }

    fn remote(method: &str, message: &str) -> ServiceError {
        ServiceError::Remote {
            method: method.to_string(),
            message: message.to_string(),
        }
    }
}

impl ModelService for MockService {
    fn get_process(&self, id: &str) -> Result<Option<Process>, ServiceError> {
        Ok(self.processes.borrow().get(id).cloned())
    }

    fn get_flow(&self, id: &str) -> Result<Option<Flow>, ServiceError> {
        Ok(self.flows.borrow().get(id).cloned())
    }

    fn find_descriptor(
        &self,
        model_type: ModelType,
        name: &str,
    ) -> Result<Option<Ref>, ServiceError> {
        let found = match model_type {
            ModelType::Process => self
                .processes
                .borrow()
                .values()
                .find(|process| process.name == name)
                .map(|process| Ref::new(process.id.clone(), process.name.clone())),
            ModelType::ProductSystem => self
                .systems
                .borrow()
                .values()
                .find(|system| system.name == name)
                .cloned(),
            ModelType::ImpactMethod => self
                .impact_methods
                .borrow()
                .iter()
                .find(|method| method.name == name)
                .cloned(),
            ModelType::Flow => self
                .flows
                .borrow()
                .values()
                .find(|flow| flow.name == name)
                .map(|flow| Ref::new(flow.id.clone(), flow.name.clone())),
        };
        Ok(found)
    }

    fn insert_process(&self, process: &Process) -> Result<Ref, ServiceError> {
        if let Some(limit) = self.fail_inserts_after.get() {
            if self.inserts.get() >= limit {
                return Err(Self::remote("data/put", "injected insert failure"));
            }
        }
        self.inserts.set(self.inserts.get() + 1);
        self.processes
            .borrow_mut()
            .insert(process.id.clone(), process.clone());
        Ok(Ref::new(process.id.clone(), process.name.clone()))
    }

    fn delete(&self, model_type: ModelType, id: &str) -> Result<(), ServiceError> {
        let removed = match model_type {
            ModelType::Process => self.processes.borrow_mut().remove(id).is_some(),
            ModelType::ProductSystem => self.systems.borrow_mut().remove(id).is_some(),
            ModelType::Flow => self.flows.borrow_mut().remove(id).is_some(),
            ModelType::ImpactMethod => false,
        };
        if !removed {
            return Err(Self::remote("data/delete", "404 not found"));
        }
        self.deletes.set(self.deletes.get() + 1);
        Ok(())
    }

    fn create_product_system(&self, process_id: &str) -> Result<Ref, ServiceError> {
        let name = self
            .processes
            .borrow()
            .get(process_id)
            .map(|process| process.name.clone())
            .ok_or_else(|| Self::remote("data/create-system", "404 not found"))?;
        self.systems_created.set(self.systems_created.get() + 1);
        let system = Ref::new(self.fresh_id("sys"), name);
        self.systems
            .borrow_mut()
            .insert(system.id.clone(), system.clone());
        Ok(system)
    }

    fn get_product_system(&self, id: &str) -> Result<Option<Ref>, ServiceError> {
        Ok(self.systems.borrow().get(id).cloned())
    }

    fn calculate(&self, _setup: &CalculationSetup) -> Result<ResultRef, ServiceError> {
        self.calculations.set(self.calculations.get() + 1);
        Ok(ResultRef {
            id: self.fresh_id("result"),
        })
    }

    fn open_simulator(&self, _setup: &CalculationSetup) -> Result<ResultRef, ServiceError> {
        self.open_simulators.set(self.open_simulators.get() + 1);
        Ok(ResultRef {
            id: self.fresh_id("simulator"),
        })
    }

    fn next_simulation(&self, _simulator: &ResultRef) -> Result<ResultRef, ServiceError> {
        self.simulations.set(self.simulations.get() + 1);
        Ok(ResultRef {
            id: self.fresh_id("iteration"),
        })
    }

    fn dispose(&self, result: &ResultRef) -> Result<(), ServiceError> {
        self.disposed.borrow_mut().push(result.id.clone());
        Ok(())
    }

    fn fetch_result_detail(
        &self,
        kind: ExportKind,
        _result: &ResultRef,
    ) -> Result<Value, ServiceError> {
        let payload = match kind {
            ExportKind::TotalImpacts => json!([
                {"impactCategory": {"@id": "ic-gwp", "name": "Climate change"}, "amount": 4.2}
            ]),
            ExportKind::TotalFlows => json!([
                {"flow": {"@id": "f-co2", "name": "Carbon dioxide"}, "amount": 2.0}
            ]),
            _ => {
                return Err(Self::remote(
                    "result/detail",
                    "per-category details must be derived",
                ))
            }
        };
        Ok(payload)
    }

    fn derive_result_detail(
        &self,
        _kind: ExportKind,
        _result: &ResultRef,
        total_impacts: &Value,
    ) -> Result<Value, ServiceError> {
        let items = total_impacts.as_array().cloned().unwrap_or_default();
        Ok(Value::Array(
            items
                .into_iter()
                .map(|item| {
                    json!({
                        "impactCategory": item.get("impactCategory").cloned().unwrap_or(Value::Null),
                        "result": [],
                    })
                })
                .collect(),
        ))
    }
}

pub fn flow(id: &str, name: &str, category: &[&str]) -> Flow {
    Flow {
        id: id.to_string(),
        name: name.to_string(),
        category: Some(lcautomate::schema::CategoryRef {
            category_path: category.iter().map(|s| s.to_string()).collect(),
            extra: serde_json::Map::new(),
        }),
        ..Flow::default()
    }
}

pub fn exchange(
    internal_id: i64,
    flow_id: &str,
    flow_name: &str,
    provider: Option<(&str, &str)>,
) -> Exchange {
    Exchange {
        internal_id,
        flow: Ref::new(flow_id, flow_name),
        default_provider: provider.map(|(id, name)| Ref::new(id, name)),
        ..Exchange::default()
    }
}

pub fn process(id: &str, name: &str, exchanges: Vec<Exchange>) -> Process {
    Process {
        id: id.to_string(),
        name: name.to_string(),
        exchanges,
        ..Process::default()
    }
}

/// Two templates: a top-level pig farm whose feed input defaults to a feed
/// mill template, replicated over the data columns Farm A and Farm B.
pub fn standard_service() -> MockService {
    let service = MockService::default();
    {
        let mut flows = service.flows.borrow_mut();
        flows.insert("f-pork".into(), flow("f-pork", "Pork", &["Meat"]));
        flows.insert("f-feed".into(), flow("f-feed", "Feed", &["Inputs"]));
        flows.insert("f-grain".into(), flow("f-grain", "Grain", &["Crops"]));
    }
    {
        let mut processes = service.processes.borrow_mut();
        processes.insert(
            "p-feed".into(),
            process(
                "p-feed",
                "Feed production",
                vec![
                    exchange(1, "f-feed", "Feed", None),
                    exchange(2, "f-grain", "Grain", None),
                ],
            ),
        );
        processes.insert(
            "p-pig".into(),
            process(
                "p-pig",
                "Pig farming",
                vec![
                    exchange(1, "f-pork", "Pork", None),
                    exchange(2, "f-feed", "Feed", Some(("p-feed", "Feed production"))),
                ],
            ),
        );
    }
    service
        .impact_methods
        .borrow_mut()
        .push(Ref::new("im-cml", "CML-IA baseline"));
    service
}

/// Driver and replication tables matching [`standard_service`].
pub fn write_standard_tables(root: &Path) {
    fs::write(
        root.join("processes.csv"),
        "Top-level?,Template process name,Template process UUID,Replication base name,Replication file\n\
         x,Pig farming,p-pig,Pig farm,pig.csv\n\
         ,Feed production,p-feed,Feed mill,feed.csv\n",
    )
    .unwrap();
    fs::write(
        root.join("pig.csv"),
        "Direction,Is reference?,Flow,Description,Category,Farm A,Farm B\n\
         Output,x,Pork,,Meat,1.0,2.0\n\
         Input,,Feed,,Inputs,3.0,4.0\n",
    )
    .unwrap();
    fs::write(
        root.join("feed.csv"),
        "Direction,Is reference?,Flow,Description,Category,Farm A,Farm B\n\
         Output,x,Feed,,Inputs,1.0,1.0\n\
         Input,,Grain,,Crops,0.5,0.7\n",
    )
    .unwrap();
}
