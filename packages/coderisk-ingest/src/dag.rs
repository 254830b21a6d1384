use crate::error::{OrchestratorError, Result};
use crate::job::StageId;
use std::collections::{HashMap, HashSet};

/// Cache key manager: one key per stage, scoped to a single ingestion run.
#[derive(Debug, Clone)]
pub struct CacheKeyManager {
    repo_id: String,
    run_id: String,
}

impl CacheKeyManager {
    pub fn new(repo_id: String, run_id: String) -> Self {
        Self { repo_id, run_id }
    }

    pub fn key_for_stage(&self, stage: StageId) -> String {
        format!("{}:{}:{}", stage.as_str(), self.repo_id, self.run_id)
    }
}

/// Stage node in the DAG.
#[derive(Debug, Clone)]
pub struct StageNode {
    pub id: StageId,
    pub name: &'static str,
    pub dependencies: Vec<StageId>,
    pub optional: bool,
    pub timeout_ms: u64,
}

impl StageNode {
    pub fn new(id: StageId, name: &'static str, dependencies: Vec<StageId>, optional: bool, timeout_ms: u64) -> Self {
        Self { id, name, dependencies, optional, timeout_ms }
    }
}

/// Pipeline DAG with topological sort into parallel execution groups.
#[derive(Debug, Clone)]
pub struct PipelineDAG {
    stages: HashMap<StageId, StageNode>,
    execution_order: Vec<Vec<StageId>>,
}

impl PipelineDAG {
    pub fn new(stages: Vec<StageNode>) -> Result<Self> {
        let mut stage_map = HashMap::new();
        for stage in stages {
            stage_map.insert(stage.id, stage);
        }

        for stage in stage_map.values() {
            for dep in &stage.dependencies {
                if !stage_map.contains_key(dep) {
                    return Err(OrchestratorError::MissingDependency(format!(
                        "Stage {:?} depends on non-existent stage {:?}",
                        stage.id, dep
                    )));
                }
            }
        }

        let execution_order = Self::topological_sort(&stage_map)?;

        Ok(Self { stages: stage_map, execution_order })
    }

    /// The CodeRisk ingestion pipeline (§4.2-§4.7):
    /// (FileIdentityResolver ∥ Topologizer) → (Atomizer ∥ ReferenceExtractor) → CouplingSynthesizer.
    ///
    /// The Atomizer needs canonical paths from the resolver and commit
    /// order from the topologizer; the reference extractor only needs
    /// canonical paths to link an issue reference to a file. The coupling
    /// synthesizer needs both the atomizer's block changes and the
    /// extractor's references for the temporal correlator pass.
    pub fn default_pipeline() -> Result<Self> {
        let stages = vec![
            StageNode::new(StageId::FileIdentityResolver, "File Identity Resolver", vec![], false, 300_000),
            StageNode::new(StageId::Topologizer, "Topologizer", vec![], false, 120_000),
            StageNode::new(
                StageId::Atomizer,
                "Atomizer",
                vec![StageId::FileIdentityResolver, StageId::Topologizer],
                false,
                600_000,
            ),
            StageNode::new(
                StageId::ReferenceExtractor,
                "Reference Extractor",
                vec![StageId::FileIdentityResolver],
                false,
                300_000,
            ),
            StageNode::new(
                StageId::CouplingSynthesizer,
                "Temporal Correlator & Coupling Synthesizer",
                vec![StageId::Atomizer, StageId::ReferenceExtractor],
                false,
                300_000,
            ),
        ];

        Self::new(stages)
    }

    fn topological_sort(stages: &HashMap<StageId, StageNode>) -> Result<Vec<Vec<StageId>>> {
        let mut in_degree: HashMap<StageId, usize> = stages.keys().map(|&id| (id, 0)).collect();

        for stage in stages.values() {
            for &_dep in &stage.dependencies {
                *in_degree.get_mut(&stage.id).unwrap() += 1;
            }
        }

        let mut result = Vec::new();
        let mut processed = HashSet::new();

        while processed.len() < stages.len() {
            let ready: Vec<StageId> = in_degree
                .iter()
                .filter(|(id, &degree)| degree == 0 && !processed.contains(*id))
                .map(|(&id, _)| id)
                .collect();

            if ready.is_empty() {
                return Err(OrchestratorError::DagCycleDetected);
            }

            result.push(ready.clone());

            for &stage_id in &ready {
                processed.insert(stage_id);
                in_degree.remove(&stage_id);

                for dependent in stages.values() {
                    if dependent.dependencies.contains(&stage_id) {
                        *in_degree.get_mut(&dependent.id).unwrap() -= 1;
                    }
                }
            }
        }

        Ok(result)
    }

    pub fn execution_order(&self) -> &[Vec<StageId>] {
        &self.execution_order
    }

    pub fn get_stage(&self, id: StageId) -> Option<&StageNode> {
        self.stages.get(&id)
    }

    pub fn execution_plan(&self) -> String {
        self.execution_order
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let stage_names: Vec<_> = group.iter().map(|id| self.stages[id].name).collect();
                if group.len() > 1 {
                    format!("Phase {}: {} (parallel)", i + 1, stage_names.join(" ∥ "))
                } else {
                    format!("Phase {}: {}", i + 1, stage_names[0])
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn required_cache_keys(&self, stage_id: StageId, cache_mgr: &CacheKeyManager) -> Vec<String> {
        let stage = match self.stages.get(&stage_id) {
            Some(s) => s,
            None => return vec![],
        };

        stage.dependencies.iter().map(|dep_id| cache_mgr.key_for_stage(*dep_id)).collect()
    }
}
