//! Task graph of one transform and its evaluation.
//!
//! [`ComputationGraph::build`] plans the decomposition and attaches a task to
//! every unit of work without running anything:
//!
//! - one **leaf** task per leaf node, producing that leaf's single chunk;
//! - one **butterfly** task per internal node and pair index `p`, producing
//!   output chunks `p` and `p + half` from chunk `p` of both children.
//!
//! Tasks are grouped into levels by node height. Evaluation runs every level
//! below the root through the [`Executor`](crate::scheduler::Executor) and
//! then sweeps the root chunks in index order, so output is produced
//! sequentially whether it goes to memory or to a store.

use std::collections::HashMap;
use tracing::{debug, info, info_span, warn};

use daft_cache::{Block, BlockCache};
use daft_store::{partial_name, ArrayStore};

use crate::butterfly::combine_chunk;
use crate::error::DaftResult;
use crate::kernel::Complex64;
use crate::leaf::LeafTransformer;
use crate::plan::{plan, NodeSpan, Plan};
use crate::scheduler::{CancelToken, Daft};
use crate::signal::SignalSource;

/// Index of a task within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

/// Work performed by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// In-core transform of a leaf.
    Leaf { node: NodeSpan },
    /// Butterfly of chunk `pair` of both children of `node`.
    Butterfly { node: NodeSpan, pair: u64 },
}

impl TaskKind {
    pub fn node(&self) -> NodeSpan {
        match *self {
            Self::Leaf { node } | Self::Butterfly { node, .. } => node,
        }
    }

    /// Output chunk indices this task produces.
    pub fn outputs(&self, leaf_len: usize) -> Vec<u64> {
        match *self {
            Self::Leaf { .. } => vec![0],
            Self::Butterfly { node, pair } => {
                let half = node.len / leaf_len as u64 / 2;
                vec![pair, pair + half]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Height of the task's node; leaves are level 0.
    pub level: u32,
    pub deps: Vec<TaskId>,
}

/// Planned, not yet executed transform of one signal.
pub struct ComputationGraph<'a, S: ?Sized> {
    source: &'a S,
    plan: Plan,
    tasks: Vec<Task>,
    levels: Vec<Vec<TaskId>>,
}

impl<S: ?Sized> std::fmt::Debug for ComputationGraph<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationGraph")
            .field("len", &self.plan.len())
            .field("leaf_len", &self.plan.leaf_len())
            .field("height", &self.plan.height())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl<'a, S: SignalSource + ?Sized> ComputationGraph<'a, S> {
    /// Plan `source` for `chunksize` and lay out its tasks.
    ///
    /// # Errors
    ///
    /// Planning errors only; nothing is read or computed.
    pub fn build(source: &'a S, chunksize: usize) -> DaftResult<Self> {
        let plan = plan(source.len(), chunksize)?;
        let leaf_len = plan.leaf_len() as u64;

        let mut tasks: Vec<Task> = Vec::new();
        let mut levels: Vec<Vec<TaskId>> = Vec::with_capacity(plan.height() as usize + 1);
        // (node, chunk) -> task producing that chunk
        let mut producers: HashMap<(NodeSpan, u64), TaskId> = HashMap::new();

        for height in 0..=plan.height() {
            let mut level = Vec::new();
            for node in plan.nodes_at(height) {
                if height == 0 {
                    let id = TaskId(tasks.len());
                    tasks.push(Task {
                        id,
                        kind: TaskKind::Leaf { node },
                        level: 0,
                        deps: Vec::new(),
                    });
                    producers.insert((node, 0), id);
                    level.push(id);
                    continue;
                }

                let half = node.len / leaf_len / 2;
                let (even, odd) = node.children();
                for pair in 0..half {
                    let id = TaskId(tasks.len());
                    let deps = [even, odd]
                        .iter()
                        .filter_map(|child| producers.get(&(*child, pair)).copied())
                        .collect();
                    tasks.push(Task {
                        id,
                        kind: TaskKind::Butterfly { node, pair },
                        level: height,
                        deps,
                    });
                    producers.insert((node, pair), id);
                    producers.insert((node, pair + half), id);
                    level.push(id);
                }
            }
            levels.push(level);
        }

        debug!(
            len = plan.len(),
            tasks = tasks.len(),
            levels = levels.len(),
            "Built computation graph"
        );
        Ok(Self {
            source,
            plan,
            tasks,
            levels,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Task ids grouped by level, leaves first.
    pub fn levels(&self) -> &[Vec<TaskId>] {
        &self.levels
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    /// Tasks whose output `id` consumes.
    pub fn dependencies(&self, id: TaskId) -> &[TaskId] {
        match self.tasks.get(id.0) {
            Some(task) => &task.deps,
            None => &[],
        }
    }

    /// Evaluate into an in-memory vector.
    pub fn compute(&self, daft: &Daft, cache: &BlockCache) -> DaftResult<Vec<Complex64>> {
        let span = info_span!("daft_compute", len = self.plan.len());
        let _enter = span.enter();

        let mut out = Vec::with_capacity(self.plan.len() as usize);
        self.evaluate(daft, cache, |_, block| {
            out.extend_from_slice(block);
            Ok(())
        })?;
        info!(len = out.len(), "Transform computed in memory");
        Ok(out)
    }

    /// Evaluate into dataset `name` of `store`, returning the elements written.
    ///
    /// Chunks are written to `<name>.partial`, which is created before any
    /// work starts and renamed to `name` after the last chunk. An existing
    /// `name` is replaced. On any error the partial dataset is removed and
    /// `name` is left untouched.
    pub fn write_to_store(
        &self,
        daft: &Daft,
        store: &dyn ArrayStore,
        name: &str,
        cache: &BlockCache,
    ) -> DaftResult<u64> {
        let span = info_span!("daft_write", len = self.plan.len(), dataset = name);
        let _enter = span.enter();

        let partial = partial_name(name);
        store.create_dataset(&partial, self.plan.len())?;

        let result = self
            .evaluate(daft, cache, |offset, block| {
                store.write_slice(&partial, offset, block)?;
                Ok(())
            })
            .and_then(|()| Ok(store.rename_dataset(&partial, name)?));

        match result {
            Ok(()) => {
                info!(len = self.plan.len(), dataset = name, "Transform written");
                Ok(self.plan.len())
            }
            Err(e) => {
                if store.contains(&partial) {
                    if let Err(cleanup) = store.remove_dataset(&partial) {
                        warn!(dataset = %partial, error = %cleanup, "Failed to remove partial dataset");
                    }
                }
                Err(e)
            }
        }
    }

    /// Run every level below the root, then hand root chunks to `sink` in order.
    ///
    /// No block of the plan is left in `cache` afterwards, whether the run
    /// succeeded, failed or was cancelled.
    fn evaluate<F>(&self, daft: &Daft, cache: &BlockCache, sink: F) -> DaftResult<()>
    where
        F: FnMut(u64, &[Complex64]) -> DaftResult<()>,
    {
        let result = self.sweep(daft, cache, sink);
        let discarded = self.discard_blocks(cache);
        match &result {
            Err(e) => debug!(error = %e, discarded, "Dropped blocks of failed run"),
            Ok(()) if discarded > 0 => debug!(discarded, "Dropped unconsumed blocks"),
            Ok(()) => {}
        }
        result
    }

    /// Remove every `(node, chunk)` block of the plan from `cache`.
    fn discard_blocks(&self, cache: &BlockCache) -> usize {
        let mut discarded = 0;
        for height in 0..=self.plan.height() {
            for node in self.plan.nodes_at(height) {
                for j in 0..self.plan.chunks_at(height) {
                    let key = node.block_key(j);
                    if cache.contains(&key) {
                        cache.discard(&key);
                        discarded += 1;
                    }
                }
            }
        }
        discarded
    }

    fn sweep<F>(&self, daft: &Daft, cache: &BlockCache, mut sink: F) -> DaftResult<()>
    where
        F: FnMut(u64, &[Complex64]) -> DaftResult<()>,
    {
        let evaluator = Evaluator {
            plan: &self.plan,
            leaf: LeafTransformer::new(self.source, daft.kernel()),
            cache,
            cancel: daft.cancel_token(),
        };

        let executor = daft.executor();
        let root_level = self.plan.height() as usize;
        for (level, ids) in self.levels.iter().enumerate().take(root_level) {
            executor.run_level(level, ids, |id| evaluator.run(&self.tasks[id.0].kind))?;
        }

        let root = self.plan.root().span;
        let leaf_len = self.plan.leaf_len() as u64;
        for j in 0..self.plan.chunks_at(self.plan.height()) {
            let block = evaluator.chunk(root, j)?;
            sink(j * leaf_len, &block)?;
            cache.discard(&root.block_key(j));
        }
        debug!(stats = ?cache.stats(), "Root sweep complete");
        Ok(())
    }
}

/// Produces node chunks through the cache, recomputing evicted inputs.
struct Evaluator<'g, S: ?Sized> {
    plan: &'g Plan,
    leaf: LeafTransformer<'g, S>,
    cache: &'g BlockCache,
    cancel: &'g CancelToken,
}

impl<S: SignalSource + ?Sized> Evaluator<'_, S> {
    fn run(&self, kind: &TaskKind) -> DaftResult<()> {
        match *kind {
            TaskKind::Leaf { node } => self.chunk(node, 0).map(drop),
            TaskKind::Butterfly { node, pair } => self.chunk(node, pair).map(drop),
        }
    }

    /// Chunk `j` of `node`'s transform.
    ///
    /// A butterfly always yields both chunks of a pair, so chunks `pair` and
    /// `pair + half` share one computation; the one not asked for is cached
    /// for its own consumer.
    fn chunk(&self, node: NodeSpan, j: u64) -> DaftResult<Block> {
        self.cancel.check()?;
        let chunks = node.len / self.plan.leaf_len() as u64;
        if chunks <= 1 {
            return self.cache.get_or_compute(node.block_key(j), || {
                Ok(Block::from(self.leaf.transform(node)?))
            });
        }
        let half = chunks / 2;
        let pair = j % half;
        self.cache.get_or_compute_pair(
            node.block_key(pair),
            node.block_key(pair + half),
            j >= half,
            || self.realize_pair(node, pair),
        )
    }

    /// Combine chunk `pair` of both children into output chunks `pair` and
    /// `pair + half`. The consumed child chunks are discarded.
    fn realize_pair(&self, node: NodeSpan, pair: u64) -> DaftResult<(Block, Block)> {
        let (even, odd) = node.children();
        let even_chunk = self.chunk(even, pair)?;
        let odd_chunk = self.chunk(odd, pair)?;

        let offset = pair * self.plan.leaf_len() as u64;
        let (low, high) = combine_chunk(&even_chunk, &odd_chunk, offset, node.len)?;

        self.cache.discard(&even.block_key(pair));
        self.cache.discard(&odd.block_key(pair));
        Ok((Block::from(low), Block::from(high)))
    }
}
