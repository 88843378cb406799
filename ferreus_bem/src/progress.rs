/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines assembly progress events, sinks, and helper functions for long-running fills.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Progress reporting primitives for matrix assembly.

use std::fmt::Debug;
use std::sync::{mpsc, Arc};
use std::thread;

/// Progress events emitted while a matrix is assembled.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyProgress {
    /// An admissible or inadmissible leaf block has been filled.
    BlockFilled { admissible: bool, rank: usize },

    /// A nested basis has been built for a cluster.
    BasisBuilt { cluster: usize, rank: usize },

    /// Son blocks were merged into one low-rank block.
    BlockCoarsened { rows: usize, cols: usize, rank: usize },

    /// A flat matrix has been converted into a nested one.
    HierarchicalCompression { progress: f64 },
}

/// Sink that consumes progress messages.
pub trait ProgressSink: Send + Sync + Debug {
    fn emit(&self, msg: AssemblyProgress);
}

/// Progress sink that forwards messages over a channel.
///
/// Emitting blocks while the channel buffer is full.
#[derive(Debug)]
pub struct ClosureSink {
    tx: mpsc::SyncSender<AssemblyProgress>,
}

impl ProgressSink for ClosureSink {
    #[inline]
    fn emit(&self, msg: AssemblyProgress) {
        if self.tx.send(msg).is_err() {
            log::warn!("progress listener has stopped; event discarded");
        }
    }
}

/// Spawns a listener thread that runs a handler closure for each progress message.
///
/// The thread finishes once every clone of the returned sink has been dropped.
pub fn closure_sink<F>(
    buffer: usize,
    mut handler: F,
) -> (Arc<dyn ProgressSink>, thread::JoinHandle<()>)
where
    F: FnMut(AssemblyProgress) + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<AssemblyProgress>(buffer.max(1));
    let sink: Arc<dyn ProgressSink> = Arc::new(ClosureSink { tx });

    let handle = thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            handler(msg);
        }
    });

    (sink, handle)
}

/// Emits `msg` if a sink is installed.
#[inline]
pub(crate) fn report(sink: &Option<Arc<dyn ProgressSink>>, msg: impl FnOnce() -> AssemblyProgress) {
    if let Some(sink) = sink {
        sink.emit(msg());
    }
}
