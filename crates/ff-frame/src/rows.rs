//! Row-level views over a shared frame.
//!
//! A [`RowProxy`] holds a weak back-reference plus the frame's shape version
//! at creation. Cell writes go straight to the frame; any row insert or delete
//! afterwards turns every outstanding proxy stale.

use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use ff_index::{IndexError, IndexLabel};
use ff_types::Scalar;

use crate::{DataFrame, FrameError, Series};

/// Reference-counted, interior-mutable owner of a frame.
#[derive(Debug, Clone)]
pub struct SharedFrame {
    inner: Rc<RefCell<DataFrame>>,
}

impl SharedFrame {
    #[must_use]
    pub fn new(frame: DataFrame) -> Self {
        Self {
            inner: Rc::new(RefCell::new(frame)),
        }
    }

    pub fn borrow(&self) -> Result<Ref<'_, DataFrame>, FrameError> {
        self.inner
            .try_borrow()
            .map_err(|_| FrameError::InvalidArgument("frame is mutably borrowed".to_owned()))
    }

    /// Run `f` against the frame with exclusive access.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut DataFrame) -> Result<T, FrameError>,
    ) -> Result<T, FrameError> {
        let mut frame = self
            .inner
            .try_borrow_mut()
            .map_err(|_| FrameError::InvalidArgument("frame is already borrowed".to_owned()))?;
        f(&mut frame)
    }

    /// Independent copy of the current frame.
    pub fn snapshot(&self) -> Result<DataFrame, FrameError> {
        Ok(self.borrow()?.clone())
    }

    #[must_use]
    pub fn rows(&self) -> Rows {
        Rows {
            frame: self.clone(),
            restriction: None,
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn proxy(&self, position: usize, shape_version: u64) -> RowProxy {
        RowProxy {
            frame: Rc::downgrade(&self.inner),
            position,
            shape_version,
        }
    }
}

/// The rows of a shared frame, optionally restricted to an ordered subset of
/// absolute positions.
///
/// An unrestricted collection follows the frame live. A restriction is pinned
/// to the shape version it was taken at and turns stale after a row insert or
/// delete, like a proxy.
#[derive(Debug, Clone)]
pub struct Rows {
    frame: SharedFrame,
    restriction: Option<Restriction>,
}

#[derive(Debug, Clone)]
struct Restriction {
    positions: Vec<usize>,
    shape_version: u64,
}

impl Rows {
    #[must_use]
    pub fn frame(&self) -> &SharedFrame {
        &self.frame
    }

    /// The restricted positions, or `None` when unrestricted.
    fn restricted<'a>(&'a self, frame: &DataFrame) -> Result<Option<&'a [usize]>, FrameError> {
        match &self.restriction {
            Some(restriction) if restriction.shape_version != frame.shape_version() => {
                Err(FrameError::StaleReference(
                    "frame shape changed since these rows were taken".to_owned(),
                ))
            }
            Some(restriction) => Ok(Some(restriction.positions.as_slice())),
            None => Ok(None),
        }
    }

    /// Absolute positions covered by this collection, in iteration order.
    pub fn positions(&self) -> Result<Vec<usize>, FrameError> {
        let frame = self.frame.borrow()?;
        match self.restricted(&frame)? {
            Some(positions) => Ok(positions.to_vec()),
            None => Ok((0..frame.len()).collect()),
        }
    }

    pub fn len(&self) -> Result<usize, FrameError> {
        let frame = self.frame.borrow()?;
        match self.restricted(&frame)? {
            Some(positions) => Ok(positions.len()),
            None => Ok(frame.len()),
        }
    }

    pub fn is_empty(&self) -> Result<bool, FrameError> {
        Ok(self.len()? == 0)
    }

    /// Proxy for the `i`-th row of this collection.
    pub fn at(&self, i: usize) -> Result<RowProxy, FrameError> {
        let frame = self.frame.borrow()?;
        let position = match self.restricted(&frame)? {
            Some(positions) => *positions.get(i).ok_or(IndexError::OutOfRange {
                position: i,
                len: positions.len(),
            })?,
            None => {
                if i >= frame.len() {
                    return Err(IndexError::OutOfRange {
                        position: i,
                        len: frame.len(),
                    }
                    .into());
                }
                i
            }
        };
        Ok(self.frame.proxy(position, frame.shape_version()))
    }

    /// Proxy for the first row carrying `label` that lies inside this collection.
    pub fn fetch(&self, label: &IndexLabel) -> Result<RowProxy, FrameError> {
        let frame = self.frame.borrow()?;
        let restricted = self.restricted(&frame)?;
        let not_found = || IndexError::KeyNotFound {
            label: label.clone(),
        };
        let candidates = frame.index().get_positions(label).ok_or_else(not_found)?;
        let position = match restricted {
            Some(allowed) => candidates
                .iter()
                .copied()
                .find(|p| allowed.contains(p))
                .ok_or_else(not_found)?,
            None => candidates[0],
        };
        Ok(self.frame.proxy(position, frame.shape_version()))
    }

    /// Rows matching `labels` in request order, narrowed to this collection.
    pub fn slice(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let frame = self.frame.borrow()?;
        let positions = frame.index().slice_positions(labels)?;
        self.restricted_to(&frame, positions)
    }

    /// Rows at absolute `positions`, narrowed to this collection.
    pub fn slice_at(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let frame = self.frame.borrow()?;
        let positions = frame.index().positions_at(positions)?;
        self.restricted_to(&frame, positions)
    }

    fn restricted_to(&self, frame: &DataFrame, positions: Vec<usize>) -> Result<Self, FrameError> {
        let positions = match self.restricted(frame)? {
            Some(allowed) => {
                let allowed: HashSet<usize> = allowed.iter().copied().collect();
                positions
                    .into_iter()
                    .filter(|p| allowed.contains(p))
                    .collect()
            }
            None => positions,
        };
        Ok(Self {
            frame: self.frame.clone(),
            restriction: Some(Restriction {
                positions,
                shape_version: frame.shape_version(),
            }),
        })
    }

    /// Collect proxies of one frame into a restricted collection pinned to
    /// their shape version.
    pub fn from_proxies(proxies: &[RowProxy]) -> Result<Self, FrameError> {
        let Some(first) = proxies.first() else {
            return Err(FrameError::InvalidArgument(
                "cannot build rows from an empty proxy list".to_owned(),
            ));
        };
        if proxies.iter().any(|p| !Weak::ptr_eq(&p.frame, &first.frame)) {
            return Err(FrameError::InvalidArgument(
                "proxies belong to different frames".to_owned(),
            ));
        }
        for proxy in proxies {
            proxy.with_frame(|_| Ok(()))?;
        }
        let inner = first.upgrade()?;
        Ok(Self {
            frame: SharedFrame { inner },
            restriction: Some(Restriction {
                positions: proxies.iter().map(|p| p.position).collect(),
                shape_version: first.shape_version,
            }),
        })
    }

    /// Lazy iterator over the rows. Each call starts from the beginning.
    pub fn iter(&self) -> Result<RowIter, FrameError> {
        let frame = self.frame.borrow()?;
        let positions = match self.restricted(&frame)? {
            Some(positions) => positions.to_vec(),
            None => (0..frame.len()).collect(),
        };
        Ok(RowIter {
            frame: self.frame.clone(),
            positions,
            next: 0,
            shape_version: frame.shape_version(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RowIter {
    frame: SharedFrame,
    positions: Vec<usize>,
    next: usize,
    shape_version: u64,
}

impl Iterator for RowIter {
    type Item = RowProxy;

    fn next(&mut self) -> Option<Self::Item> {
        let position = *self.positions.get(self.next)?;
        self.next += 1;
        Some(self.frame.proxy(position, self.shape_version))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.positions.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RowIter {}

/// Positional view of one row. Does not keep the frame alive.
#[derive(Debug, Clone)]
pub struct RowProxy {
    frame: Weak<RefCell<DataFrame>>,
    position: usize,
    shape_version: u64,
}

impl PartialEq for RowProxy {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.frame, &other.frame) && self.position == other.position
    }
}

impl RowProxy {
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    fn upgrade(&self) -> Result<Rc<RefCell<DataFrame>>, FrameError> {
        self.frame
            .upgrade()
            .ok_or_else(|| FrameError::StaleReference("frame was dropped".to_owned()))
    }

    fn check(&self, frame: &DataFrame) -> Result<(), FrameError> {
        if frame.shape_version() != self.shape_version {
            return Err(FrameError::StaleReference(format!(
                "frame shape changed since row {} was taken",
                self.position
            )));
        }
        if self.position >= frame.len() {
            return Err(FrameError::StaleReference(format!(
                "row {} is out of range for {} rows",
                self.position,
                frame.len()
            )));
        }
        Ok(())
    }

    fn with_frame<T>(
        &self,
        f: impl FnOnce(&DataFrame) -> Result<T, FrameError>,
    ) -> Result<T, FrameError> {
        let inner = self.upgrade()?;
        let frame = inner
            .try_borrow()
            .map_err(|_| FrameError::InvalidArgument("frame is mutably borrowed".to_owned()))?;
        self.check(&frame)?;
        f(&frame)
    }

    fn with_frame_mut<T>(
        &self,
        f: impl FnOnce(&mut DataFrame) -> Result<T, FrameError>,
    ) -> Result<T, FrameError> {
        let inner = self.upgrade()?;
        let mut frame = inner
            .try_borrow_mut()
            .map_err(|_| FrameError::InvalidArgument("frame is already borrowed".to_owned()))?;
        self.check(&frame)?;
        f(&mut frame)
    }

    pub fn label(&self) -> Result<IndexLabel, FrameError> {
        self.with_frame(|frame| Ok(frame.index().label_at(self.position)?.clone()))
    }

    pub fn get(&self, column: &str) -> Result<Scalar, FrameError> {
        self.with_frame(|frame| frame.value(self.position, column).cloned())
    }

    /// Write through to the frame. An incompatible value leaves it unchanged.
    pub fn set(&self, column: &str, value: impl Into<Scalar>) -> Result<(), FrameError> {
        let value = value.into();
        self.with_frame_mut(|frame| frame.set_value(self.position, column, value))
    }

    /// Independent copy of the row, indexed by column name.
    pub fn to_series(&self) -> Result<Series, FrameError> {
        self.with_frame(|frame| frame.row(self.position))
    }

    /// Whether `row` has this row's column labels and values.
    pub fn matches_row(&self, row: &Series) -> Result<bool, FrameError> {
        let current = self.to_series()?;
        Ok(current.index() == row.index()
            && current
                .values()
                .iter()
                .zip(row.values())
                .all(|(a, b)| a.semantic_eq(b)))
    }
}
