//! Bounded windows for streaming accumulation.
//!
//! [`RingBuffer`] is a fixed-capacity queue that evicts its oldest element.
//! [`RollingSum`] builds on it to maintain a calendar-day window total in
//! constant memory: each day enters once, leaves once, and the running sum is
//! updated incrementally instead of re-summing the window.

use chrono::NaiveDate;
use std::collections::VecDeque;
use thiserror::Error;

/// A fixed-capacity ring buffer that evicts oldest elements when full.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a ring buffer holding at most `capacity` elements.
    ///
    /// # Panics
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be greater than 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes an element, returning the evicted oldest element when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Removes and returns the oldest element.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.items.back_mut()
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RollingError {
    #[error("rolling window must span at least one day")]
    EmptyWindow,
    #[error("sample for {date} arrived after {latest}")]
    OutOfOrder { date: NaiveDate, latest: NaiveDate },
}

/// Sum of daily values over the trailing `window_days` calendar days.
///
/// The window ending at day `d` covers `d - window_days + 1 ..= d`. Days with
/// no sample contribute nothing, and NaN samples are treated as missing.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingSum {
    window_days: u32,
    days: RingBuffer<(NaiveDate, f64)>,
    sum: f64,
}

impl RollingSum {
    pub fn new(window_days: u32) -> Result<Self, RollingError> {
        if window_days == 0 {
            return Err(RollingError::EmptyWindow);
        }
        Ok(Self {
            window_days,
            days: RingBuffer::new(window_days as usize),
            sum: 0.0,
        })
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// Adds a sample and returns the window total ending at `date`.
    ///
    /// Samples must arrive in non-decreasing date order; several samples on
    /// the same day are added together.
    pub fn push(&mut self, date: NaiveDate, value: f64) -> Result<f64, RollingError> {
        let value = if value.is_nan() { 0.0 } else { value };

        if let Some(&(latest, _)) = self.days.back() {
            if date < latest {
                return Err(RollingError::OutOfOrder { date, latest });
            }
        }
        self.expire_before(date);

        let same_day = matches!(self.days.back(), Some(&(latest, _)) if latest == date);
        if same_day {
            if let Some((_, total)) = self.days.back_mut() {
                *total += value;
            }
        } else if let Some((_, old)) = self.days.push((date, value)) {
            self.sum -= old;
        }
        self.sum += value;
        Ok(self.sum)
    }

    /// Current total without adding a sample.
    pub fn total(&self) -> f64 {
        self.sum
    }

    /// Days currently held in the window.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    fn expire_before(&mut self, date: NaiveDate) {
        let span = i64::from(self.window_days);
        while let Some(&(oldest, value)) = self.days.front() {
            if (date - oldest).num_days() < span {
                break;
            }
            self.days.pop_front();
            self.sum -= value;
        }
        if self.days.is_empty() {
            // Drop accumulated rounding error whenever the window drains.
            self.sum = 0.0;
        }
    }
}
