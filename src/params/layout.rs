use std::{mem, ops::Range};

/// The offset table carving a flat buffer into the per-tensor regions of a model.
///
/// Entries follow the traversal order of the model's learnable tensors. Every replica
/// of a run shares the same layout instance, so two replicas can never disagree on where
/// a tensor lives inside the flat buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    ranges: Vec<Range<usize>>,
    size: usize,
}

impl ParamLayout {
    /// Creates a new `ParamLayout`.
    ///
    /// # Arguments
    /// * `sizes` - The element count of each learnable tensor, in traversal order.
    ///
    /// # Returns
    /// A new `ParamLayout` instance.
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut offset = 0;

        let ranges = sizes
            .iter()
            .map(|&len| {
                let range = offset..offset + len;
                offset += len;
                range
            })
            .collect();

        Self {
            ranges,
            size: offset,
        }
    }

    /// The total amount of elements in a flat buffer following this layout.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The amount of tensors in this layout.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The region of the `i`-th tensor.
    pub fn get(&self, i: usize) -> Option<Range<usize>> {
        self.ranges.get(i).cloned()
    }

    /// Iterates the `(offset, len)` pairs of every tensor.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.ranges.iter().map(|range| (range.start, range.len()))
    }
}

/// Read-only per-tensor view over a flat buffer.
#[derive(Clone, Copy)]
pub struct Tensors<'a> {
    layout: &'a ParamLayout,
    data: &'a [f32],
}

impl<'a> Tensors<'a> {
    /// Creates a new `Tensors` view.
    ///
    /// # Panics
    /// If `data` doesn't match the size of the layout.
    pub fn new(layout: &'a ParamLayout, data: &'a [f32]) -> Self {
        assert_eq!(layout.size(), data.len(), "buffer doesn't match its layout");
        Self { layout, data }
    }

    /// The `i`-th tensor.
    ///
    /// # Panics
    /// If `i` is out of bounds.
    pub fn get(&self, i: usize) -> &'a [f32] {
        &self.data[self.layout.ranges[i].clone()]
    }

    /// The whole flat buffer.
    pub fn flat(&self) -> &'a [f32] {
        self.data
    }
}

/// Mutable per-tensor view over a flat buffer.
pub struct TensorsMut<'a> {
    layout: &'a ParamLayout,
    data: &'a mut [f32],
}

impl<'a> TensorsMut<'a> {
    /// Creates a new `TensorsMut` view.
    ///
    /// # Panics
    /// If `data` doesn't match the size of the layout.
    pub fn new(layout: &'a ParamLayout, data: &'a mut [f32]) -> Self {
        assert_eq!(layout.size(), data.len(), "buffer doesn't match its layout");
        Self { layout, data }
    }

    /// The `i`-th tensor.
    ///
    /// # Panics
    /// If `i` is out of bounds.
    pub fn get_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[self.layout.ranges[i].clone()]
    }

    /// Splits the buffer into every tensor at once.
    pub fn split(&mut self) -> Vec<&mut [f32]> {
        let mut rest = &mut self.data[..];
        let mut tensors = Vec::with_capacity(self.layout.len());

        for (_, len) in self.layout.iter() {
            let (tensor, tail) = mem::take(&mut rest).split_at_mut(len);
            tensors.push(tensor);
            rest = tail;
        }

        tensors
    }

    /// The whole flat buffer.
    pub fn flat(&mut self) -> &mut [f32] {
        &mut self.data[..]
    }
}
