//! Execution engine
//!
//! Runs an assembled [`Pipeline`]: the byte source, every stage and the
//! sink are connected in series by bounded channels and polled together on
//! the calling task. A stage blocked on a full channel pauses everything
//! above it.
//!
//! A stage that returns [`Flow::Stop`] cancels the stages above it and then
//! drains normally, so everything below still flushes. Each runner's
//! cancellation token is a child of its downstream neighbour's, which makes
//! one `cancel()` reach the whole upstream chain.

use crate::backend::{ByteSink, ByteSource};
use crate::item::Item;
use crate::stage::{BoxStage, Flow, Outlet, RecordCounter, Stage};
use futures::future::{try_join_all, BoxFuture};
use futures::{FutureExt, StreamExt};
use marcstream_common::{Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Result of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Records counted by the metrics stage
    pub records: u64,
    /// A stage declared a controlled stop before the input ended
    pub stopped_early: bool,
}

/// How a runner ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Done,
    Stopped,
    Cancelled,
    /// Downstream went away without a stop being declared
    Closed,
}

/// Source, stages and sink of one run, ready to execute
pub struct Pipeline {
    source: ByteSource,
    source_label: String,
    stages: Vec<BoxStage>,
    sink: Option<(String, Box<dyn ByteSink>)>,
    counter: RecordCounter,
    capacity: usize,
}

impl Pipeline {
    pub fn new(source: ByteSource, source_label: impl Into<String>, counter: RecordCounter) -> Self {
        Self {
            source,
            source_label: source_label.into(),
            stages: Vec::new(),
            sink: None,
            counter,
            capacity: crate::config::DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn push_stage(&mut self, stage: BoxStage) {
        self.stages.push(stage);
    }

    pub fn set_sink(&mut self, label: impl Into<String>, sink: Box<dyn ByteSink>) {
        self.sink = Some((label.into(), sink));
    }

    pub fn counter(&self) -> &RecordCounter {
        &self.counter
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Names of all runners in order, source first
    pub fn stage_names(&self) -> Vec<String> {
        let mut names = vec![format!("source {}", self.source_label)];
        names.extend(self.stages.iter().map(|s| s.name().to_string()));
        if let Some((label, _)) = &self.sink {
            names.push(format!("sink {}", label));
        }
        names
    }

    pub async fn run(self) -> Result<Outcome> {
        let names = self.stage_names();
        let Pipeline {
            source,
            source_label,
            stages,
            sink,
            counter,
            capacity,
        } = self;
        let runner_count = names.len();
        info!(stages = ?names, capacity, "running pipeline");

        let mut tokens = vec![CancellationToken::new()];
        while tokens.len() < runner_count {
            let child = tokens[tokens.len() - 1].child_token();
            tokens.push(child);
        }
        // tokens[0] belongs to the source, the deepest child
        tokens.reverse();

        let mut senders = Vec::with_capacity(runner_count);
        let mut receivers = Vec::with_capacity(runner_count);
        receivers.push(None);
        for _ in 1..runner_count {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(Some(tx));
            receivers.push(Some(rx));
        }
        senders.push(None);

        let outlet = |tx: Option<mpsc::Sender<Item>>| match tx {
            Some(tx) => Outlet::Channel(tx),
            None => Outlet::Discard,
        };

        let mut runners: Vec<BoxFuture<'static, Result<Exit>>> = Vec::with_capacity(runner_count);
        let mut senders = senders.into_iter();
        let mut receivers = receivers.into_iter().skip(1);
        let mut index = 0;

        runners.push(wrap(
            run_source(
                source,
                source_label,
                outlet(senders.next().flatten()),
                tokens[index].clone(),
            ),
            names[index].clone(),
            index,
            counter.clone(),
        ));

        for stage in stages {
            index += 1;
            let input = receivers
                .next()
                .flatten()
                .ok_or_else(|| Error::Unknown("stage without input channel".to_string()))?;
            runners.push(wrap(
                run_stage(
                    stage,
                    input,
                    outlet(senders.next().flatten()),
                    tokens[index].clone(),
                    tokens[index - 1].clone(),
                ),
                names[index].clone(),
                index,
                counter.clone(),
            ));
        }

        if let Some((_, sink)) = sink {
            index += 1;
            let input = receivers
                .next()
                .flatten()
                .ok_or_else(|| Error::Unknown("sink without input channel".to_string()))?;
            runners.push(wrap(
                run_sink(sink, input, tokens[index].clone()),
                names[index].clone(),
                index,
                counter.clone(),
            ));
        }

        let exits = try_join_all(runners).await?;

        // a runner that lost its downstream is fine only if something below it stopped
        for (i, exit) in exits.iter().enumerate() {
            if *exit == Exit::Closed && !exits[i + 1..].contains(&Exit::Stopped) {
                return Err(Error::Pipeline {
                    stage: names[i].clone(),
                    records: counter.get(),
                    source: Box::new(Error::PrematureClose(names[i].clone())),
                });
            }
        }

        let outcome = Outcome {
            records: counter.get(),
            stopped_early: exits.contains(&Exit::Stopped),
        };
        info!(records = outcome.records, stopped_early = outcome.stopped_early, "pipeline finished");
        Ok(outcome)
    }
}

/// Instrument a runner and attach stage context to its error
fn wrap<F>(runner: F, name: String, index: usize, counter: RecordCounter) -> BoxFuture<'static, Result<Exit>>
where
    F: std::future::Future<Output = Result<Exit>> + Send + 'static,
{
    let span = info_span!("stage", name = %name, index);
    async move {
        let exit = runner.await.map_err(|e| match e {
            wrapped @ Error::Pipeline { .. } => wrapped,
            other => Error::Pipeline {
                stage: name.clone(),
                records: counter.get(),
                source: Box::new(other),
            },
        })?;
        debug!(?exit, "runner finished");
        Ok(exit)
    }
    .instrument(span)
    .boxed()
}

fn closed(cancel: &CancellationToken) -> Exit {
    if cancel.is_cancelled() {
        Exit::Cancelled
    } else {
        Exit::Closed
    }
}

async fn run_source(
    mut source: ByteSource,
    label: String,
    mut out: Outlet,
    cancel: CancellationToken,
) -> Result<Exit> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Exit::Cancelled),
            next = source.next() => next,
        };
        let Some(chunk) = next else {
            return Ok(Exit::Done);
        };
        let chunk = chunk.map_err(|e| Error::transport(&label, e))?;

        let pushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Exit::Cancelled),
            pushed = out.push(Item::Bytes(chunk)) => pushed,
        };
        match pushed {
            Ok(()) => {},
            Err(Error::DownstreamClosed) => return Ok(closed(&cancel)),
            Err(e) => return Err(e),
        }
    }
}

async fn run_stage(
    mut stage: BoxStage,
    mut input: mpsc::Receiver<Item>,
    mut out: Outlet,
    cancel: CancellationToken,
    upstream: CancellationToken,
) -> Result<Exit> {
    let mut exit = Exit::Done;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Exit::Cancelled),
            next = input.recv() => next,
        };
        let Some(item) = next else {
            break;
        };

        let flow = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Exit::Cancelled),
            flow = stage.process(item, &mut out) => flow,
        };
        match flow {
            Ok(Flow::Continue) => {},
            Ok(Flow::Stop) => {
                debug!("controlled stop, cancelling upstream");
                upstream.cancel();
                input.close();
                exit = Exit::Stopped;
                break;
            },
            Err(Error::DownstreamClosed) => return Ok(closed(&cancel)),
            Err(e) => return Err(e),
        }
    }

    match stage.flush(&mut out).await {
        Ok(()) => Ok(exit),
        Err(Error::DownstreamClosed) => Ok(closed(&cancel)),
        Err(e) => Err(e),
    }
}

async fn run_sink(
    mut sink: Box<dyn ByteSink>,
    mut input: mpsc::Receiver<Item>,
    cancel: CancellationToken,
) -> Result<Exit> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Exit::Cancelled),
            next = input.recv() => next,
        };
        match next {
            Some(Item::Bytes(chunk)) => sink.write(chunk).await?,
            Some(other) => {
                return Err(Error::UnexpectedItem {
                    stage: "sink".to_string(),
                    found: other.kind(),
                })
            },
            None => break,
        }
    }
    sink.finalize().await?;
    Ok(Exit::Done)
}
