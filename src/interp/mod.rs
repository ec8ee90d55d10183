use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::bind_config;
use crate::dag::walker::NodeExecutor;
use crate::dag::{build_graph, DagWalker};
use crate::eval::{Builtins, Evaluator};
use crate::program::{Node, Program};
use crate::rpc::{
    CachingLoader, Engine, GrpcEngine, GrpcLoader, GrpcMonitor, Monitor, RegisterRequest,
    RegisterResult, SchemaLoader,
};
use crate::value::{from_wire, to_wire, PropertyValue, Value};

pub mod options;
pub mod registrar;

/// The type of the synthetic root stack resource that parents everything
/// by default and carries the program's outputs.
const STACK_TYPE: &str = "pulumi:pulumi:Stack";

/// Well-known binding for the root stack's state, when the monitor
/// returns one.
const STACK_BINDING: &str = "pulumi";

/// Everything the driver hands the interpreter. The interpreter reads no
/// configuration from its working directory; all state arrives here.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub project: String,
    pub stack: String,
    pub organization: String,
    pub root_directory: PathBuf,
    pub program_dir: PathBuf,
    pub working_dir: PathBuf,
    /// Fully-qualified config key (`project:name`) → raw string.
    pub config: HashMap<String, String>,
    /// Config keys whose values are secret, marked out-of-band.
    pub config_secrets: Vec<String>,
    pub monitor_address: String,
    pub engine_address: String,
    pub loader_address: String,
    pub dry_run: bool,
    pub parallel: i32,
}

/// Cooperative cancellation shared by the walker and every RPC wrapper.
/// Cancelling aborts outstanding calls and stops the executor from
/// scheduling new nodes; partial effects are not rolled back.
#[derive(Debug, Default)]
pub struct RunContext {
    cancelled: AtomicBool,
    notify: Notify,
}

impl RunContext {
    pub fn new() -> Arc<Self> {
        Arc::new(RunContext::default())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// The interpreter: binds config, establishes the root stack, walks the
/// node DAG with bounded parallelism, registers stack outputs, and signals
/// shutdown.
pub struct Interpreter {
    program: Arc<Program>,
    run_info: RunInfo,
    ctx: Arc<RunContext>,
    monitor: Arc<dyn Monitor>,
    engine: Arc<dyn Engine>,
    loader: Arc<dyn SchemaLoader>,
    evaluator: Arc<Evaluator>,
}

impl Interpreter {
    /// Connect to the monitor, engine, and loader named in the run info.
    pub async fn connect(run_info: RunInfo, program: Program) -> Result<Self> {
        let ctx = RunContext::new();
        let monitor: Arc<dyn Monitor> = Arc::new(
            GrpcMonitor::connect(&run_info.monitor_address, Arc::clone(&ctx)).await?,
        );
        let engine: Arc<dyn Engine> = Arc::new(
            GrpcEngine::connect(&run_info.engine_address, Arc::clone(&ctx)).await?,
        );
        let loader: Arc<dyn SchemaLoader> = Arc::new(CachingLoader::new(Arc::new(
            GrpcLoader::connect(&run_info.loader_address, Arc::clone(&ctx)).await?,
        )));
        Ok(Self::with_clients(
            run_info, program, monitor, engine, loader, ctx,
        ))
    }

    /// Wire the interpreter to explicit clients. Tests substitute
    /// in-memory doubles here.
    pub fn with_clients(
        run_info: RunInfo,
        program: Program,
        monitor: Arc<dyn Monitor>,
        engine: Arc<dyn Engine>,
        loader: Arc<dyn SchemaLoader>,
        ctx: Arc<RunContext>,
    ) -> Self {
        let builtins = Builtins::new(run_info.clone())
            .with_monitor(Arc::clone(&monitor))
            .with_loader(Arc::clone(&loader));
        Interpreter {
            program: Arc::new(program),
            run_info,
            ctx,
            monitor,
            engine,
            loader,
            evaluator: Arc::new(Evaluator::new(builtins)),
        }
    }

    pub fn context(&self) -> Arc<RunContext> {
        Arc::clone(&self.ctx)
    }

    /// Execute the program to completion.
    pub async fn run(&self) -> Result<()> {
        info!(
            project = %self.run_info.project,
            stack = %self.run_info.stack,
            dry_run = self.run_info.dry_run,
            "Starting program"
        );

        bind_config(
            &self.program,
            &self.run_info.project,
            &self.run_info.config,
            &self.run_info.config_secrets,
            &self.evaluator,
        )
        .await
        .map_err(|e| anyhow!("{}", e))?;

        if let Some(expr) = self.program.required_version() {
            let value = self.evaluator.eval(expr).await.map_err(|e| anyhow!("{}", e))?;
            let range = value
                .as_str()
                .ok_or_else(|| anyhow!("requiredVersion must be a string"))?;
            self.engine.require_version(range).await?;
        }

        let stack_urn = self.register_stack().await?;

        let (graph, _) = build_graph(&self.program)?;
        let outputs: Arc<Mutex<BTreeMap<String, Value>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let executor = self.node_executor(stack_urn.clone(), Arc::clone(&outputs));

        let walker = DagWalker::new(self.parallelism());
        walker
            .walk(&graph, &self.program, Arc::new(executor), Arc::clone(&self.ctx))
            .await?;

        let collected = std::mem::take(&mut *outputs.lock().unwrap());
        let wire: BTreeMap<String, PropertyValue> = collected
            .iter()
            .map(|(name, value)| (name.clone(), to_wire(value)))
            .collect();
        self.monitor
            .register_resource_outputs(&stack_urn, wire)
            .await?;

        self.monitor.signal_and_wait_for_shutdown().await?;
        info!("Program complete");
        Ok(())
    }

    fn parallelism(&self) -> usize {
        self.run_info.parallel.max(1) as usize
    }

    /// Register the synthetic root stack resource and bind its state.
    async fn register_stack(&self) -> Result<String> {
        let name = format!("{}-{}", self.run_info.project, self.run_info.stack);
        let request = RegisterRequest {
            type_token: STACK_TYPE.to_string(),
            name,
            custom: false,
            ..Default::default()
        };
        let response = self.monitor.register_resource(request).await?;
        if response.result != RegisterResult::Success || response.urn.is_empty() {
            bail!("Root stack registration did not succeed");
        }
        debug!(urn = %response.urn, "Root stack registered");

        if !response.object.is_empty() {
            let state = Value::object(
                response
                    .object
                    .iter()
                    .map(|(key, value)| (key.clone(), from_wire(value)))
                    .collect(),
            );
            self.evaluator
                .define(STACK_BINDING, state)
                .await
                .map_err(|e| anyhow!("{}", e))?;
        }

        Ok(response.urn)
    }

    /// Build the walker's per-node executor. Bindings happen inside by
    /// side effect; output values land in the shared map.
    fn node_executor(
        &self,
        stack_urn: String,
        outputs: Arc<Mutex<BTreeMap<String, Value>>>,
    ) -> NodeExecutor {
        let program = Arc::clone(&self.program);
        let evaluator = Arc::clone(&self.evaluator);
        let monitor = Arc::clone(&self.monitor);
        let loader = Arc::clone(&self.loader);

        Box::new(move |position| {
            let program = Arc::clone(&program);
            let evaluator = Arc::clone(&evaluator);
            let monitor = Arc::clone(&monitor);
            let loader = Arc::clone(&loader);
            let outputs = Arc::clone(&outputs);
            let stack_urn = stack_urn.clone();

            Box::pin(async move {
                match &program.nodes[position] {
                    // Handled before the walk
                    Node::Config(_) | Node::Settings(_) => Ok(()),
                    Node::Local(local) => {
                        let value = evaluator
                            .eval(&local.value)
                            .await
                            .map_err(|e| anyhow!("{}", e))?;
                        evaluator
                            .define(&local.name, value)
                            .await
                            .map_err(|e| anyhow!("{}", e))
                    }
                    Node::Resource(resource) => {
                        registrar::register(resource, &evaluator, &monitor, &loader, &stack_urn)
                            .await
                    }
                    Node::Output(output) => {
                        let value = evaluator
                            .eval(&output.value)
                            .await
                            .map_err(|e| anyhow!("{}", e))?;
                        outputs.lock().unwrap().insert(output.name.clone(), value);
                        Ok(())
                    }
                }
            })
        })
    }
}
