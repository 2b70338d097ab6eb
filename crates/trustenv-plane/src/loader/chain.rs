//! Chain stage table
//!
//! The order in which owner-supplied segments are loaded is data: a table
//! mapping each stage to its successor, the keys it must carry and the task
//! permission it requires. The table is checked once on construction, so
//! walking it can never loop or fall off a missing stage.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use trustenv_core::Permission;

use crate::error::ChainError;
use crate::store::names;

/// A loadable chain stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChainStage {
    Path,
    Task,
    Rest,
    Func,
    FuncError,
}

impl ChainStage {
    pub const ALL: [ChainStage; 5] = [
        ChainStage::Path,
        ChainStage::Task,
        ChainStage::Rest,
        ChainStage::Func,
        ChainStage::FuncError,
    ];

    /// Store segment the stage loads into
    pub fn name(self) -> &'static str {
        match self {
            ChainStage::Path => names::PATH,
            ChainStage::Task => names::TASK,
            ChainStage::Rest => names::REST,
            ChainStage::Func => names::FUNC,
            ChainStage::FuncError => names::FUNC_ERROR,
        }
    }

    /// File stem of the stage's signed segment
    pub fn file_stem(self) -> &'static str {
        match self {
            ChainStage::Path => "path-env",
            ChainStage::Task => "task-env",
            ChainStage::Rest => "rest-env",
            ChainStage::Func => "func-env",
            ChainStage::FuncError => "func-error-env",
        }
    }

    /// Task key an owner's grant must hold to load the stage
    pub fn task_key(self) -> &'static str {
        match self {
            ChainStage::Path => "inc-path-env-perm",
            ChainStage::Task => "inc-task-env-perm",
            ChainStage::Rest => "inc-rest-env-perm",
            ChainStage::Func => "inc-func-env-perm",
            ChainStage::FuncError => "inc-func-error-env-perm",
        }
    }
}

impl fmt::Display for ChainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What follows a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    Next(ChainStage),
    End,
}

/// Table row for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub next: Successor,
    /// Exact key set the segment must carry; empty accepts any keys
    pub expected_keys: BTreeSet<String>,
    pub task_key: String,
    pub required: Permission,
}

impl StageSpec {
    /// Row using the stage's own task key
    pub fn new(stage: ChainStage, next: Successor, required: Permission) -> Self {
        Self {
            next,
            expected_keys: BTreeSet::new(),
            task_key: stage.task_key().to_string(),
            required,
        }
    }

    pub fn with_expected_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Compare a segment's keys with the expected set.
    /// Returns `(missing, unexpected)`, both empty on a match.
    pub fn key_mismatch<'a, I>(&self, keys: I) -> (Vec<String>, Vec<String>)
    where
        I: IntoIterator<Item = &'a String>,
    {
        if self.expected_keys.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let present: BTreeSet<&String> = keys.into_iter().collect();
        let missing = self
            .expected_keys
            .iter()
            .filter(|k| !present.contains(k))
            .cloned()
            .collect();
        let unexpected = present
            .into_iter()
            .filter(|k| !self.expected_keys.contains(*k))
            .cloned()
            .collect();
        (missing, unexpected)
    }
}

/// Keys the task stage segment carries
pub const FUNC_INCLUDE_ENV_MAP_PERM: &str = "func-include-env-map-perm";
pub const FUNC_GET_ENV_PERM: &str = "func-get-env-perm";

/// Validated stage table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTable {
    start: ChainStage,
    stages: BTreeMap<ChainStage, StageSpec>,
    order: Vec<ChainStage>,
}

impl ChainTable {
    /// Build a table starting at `start`.
    ///
    /// Fails unless `start` has a row, every successor has a row, the walk
    /// from `start` ends without revisiting a stage, and it covers every row.
    pub fn new(start: ChainStage, stages: BTreeMap<ChainStage, StageSpec>) -> Result<Self, ChainError> {
        if !stages.contains_key(&start) {
            return Err(ChainError::InvalidChainTable(format!("start stage '{start}' has no row")));
        }

        let mut order = Vec::with_capacity(stages.len());
        let mut seen = BTreeSet::new();
        let mut current = start;
        loop {
            if !seen.insert(current) {
                return Err(ChainError::InvalidChainTable(format!("cycle through '{current}'")));
            }
            order.push(current);

            let spec = stages.get(&current).ok_or_else(|| {
                ChainError::InvalidChainTable(format!("successor '{current}' has no row"))
            })?;
            if spec.task_key.trim().is_empty() {
                return Err(ChainError::InvalidChainTable(format!("stage '{current}' has no task key")));
            }
            match spec.next {
                Successor::Next(next) => current = next,
                Successor::End => break,
            }
        }

        if let Some(orphan) = stages.keys().find(|s| !seen.contains(*s)) {
            return Err(ChainError::InvalidChainTable(format!(
                "stage '{orphan}' is unreachable from '{start}'"
            )));
        }

        Ok(Self { start, stages, order })
    }

    /// The standard chain: path, task, rest, func, func-error
    pub fn default_chain() -> Self {
        use ChainStage::*;

        let stages = BTreeMap::from([
            (Path, StageSpec::new(Path, Successor::Next(Task), Permission::RW)),
            (
                Task,
                StageSpec::new(Task, Successor::Next(Rest), Permission::RWS)
                    .with_expected_keys([FUNC_INCLUDE_ENV_MAP_PERM, FUNC_GET_ENV_PERM]),
            ),
            (Rest, StageSpec::new(Rest, Successor::Next(Func), Permission::RWB)),
            (Func, StageSpec::new(Func, Successor::Next(FuncError), Permission::RWSB)),
            (FuncError, StageSpec::new(FuncError, Successor::End, Permission::RWS)),
        ]);

        Self {
            start: Path,
            order: vec![Path, Task, Rest, Func, FuncError],
            stages,
        }
    }

    pub fn start(&self) -> ChainStage {
        self.start
    }

    /// Stages in load order
    pub fn order(&self) -> &[ChainStage] {
        &self.order
    }

    pub fn spec(&self, stage: ChainStage) -> Option<&StageSpec> {
        self.stages.get(&stage)
    }

    /// Successor of a stage in this table; stages outside it end the chain
    pub fn successor(&self, stage: ChainStage) -> Successor {
        self.stages
            .get(&stage)
            .map(|spec| spec.next)
            .unwrap_or(Successor::End)
    }

    /// Every task permission the chain needs, merged per task key
    pub fn required_permissions(&self) -> BTreeMap<String, Permission> {
        let mut required: BTreeMap<String, Permission> = BTreeMap::new();
        for stage in &self.order {
            if let Some(spec) = self.stages.get(stage) {
                let entry = required.entry(spec.task_key.clone()).or_insert(Permission::NONE);
                *entry = *entry | spec.required;
            }
        }
        required
    }
}

impl Default for ChainTable {
    fn default() -> Self {
        Self::default_chain()
    }
}
