//! Burn batcher turning signal windows into tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use std::marker::PhantomData;

use crate::store::SampleStore;
use crate::window::SignalWindow;

/// A batch of windows ready for the encoder
#[derive(Clone, Debug)]
pub struct WindowBatch<B: Backend> {
    /// Signals with shape `[batch_size, 1, signal_len]`
    pub signals: Tensor<B, 3>,
    /// Labels with shape `[batch_size]`, present only if every window has one
    pub labels: Option<Tensor<B, 1, Int>>,
}

impl<B: Backend> WindowBatch<B> {
    /// Number of windows in the batch
    pub fn len(&self) -> usize {
        self.signals.dims()[0]
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks windows of a single store into a [`WindowBatch`].
///
/// All windows in one call must share a length, which [`SampleStore`]
/// guarantees.
#[derive(Clone, Debug)]
pub struct WindowBatcher<B: Backend> {
    _backend: PhantomData<B>,
}

impl<B: Backend> Default for WindowBatcher<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> WindowBatcher<B> {
    /// Create a new batcher
    pub fn new() -> Self {
        Self {
            _backend: PhantomData,
        }
    }

    /// Batches the windows at `indices` of `store`, skipping out-of-range ones
    pub fn batch_indices(
        &self,
        store: &SampleStore,
        indices: &[usize],
        device: &B::Device,
    ) -> WindowBatch<B> {
        let items = indices
            .iter()
            .filter_map(|&i| store.window(i).cloned())
            .collect();
        self.batch(items, device)
    }
}

impl<B: Backend> Batcher<B, SignalWindow, WindowBatch<B>> for WindowBatcher<B> {
    fn batch(&self, items: Vec<SignalWindow>, device: &B::Device) -> WindowBatch<B> {
        let batch_size = items.len();
        let signal_len = items.first().map_or(0, SignalWindow::len);

        let labels: Option<Vec<i64>> = items
            .iter()
            .map(|item| item.label.map(|l| l as i64))
            .collect();

        let values: Vec<f32> = items.into_iter().flat_map(|item| item.values).collect();
        let signals = Tensor::<B, 3>::from_floats(
            TensorData::new(values, [batch_size, 1, signal_len]),
            device,
        );

        let labels = labels.filter(|l| !l.is_empty()).map(|labels| {
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device)
        });

        WindowBatch { signals, labels }
    }
}
