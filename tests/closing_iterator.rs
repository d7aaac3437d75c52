//! ClosingIterator integration tests.
//!
//! The closer of every iterator here bumps a shared counter so the tests can
//! check that the release action runs exactly once on every path.

use std::{cell::Cell, rc::Rc};

use kinesis_pipe::{ClosingIterator, ElementSource, PipeError};

fn counter() -> Rc<Cell<u32>> {
    Rc::new(Cell::new(0))
}

fn counted_closer(closes: &Rc<Cell<u32>>) -> impl FnOnce() -> Result<(), PipeError> + 'static {
    let closes = Rc::clone(closes);
    move || {
        closes.set(closes.get() + 1);
        Ok(())
    }
}

fn iter_over(items: Vec<u32>, closes: &Rc<Cell<u32>>) -> ClosingIterator<u32> {
    let mut items = items.into_iter();
    ClosingIterator::from_fn(move || Ok(items.next()), counted_closer(closes))
}

/// A source whose hint never turns false on its own.
struct Endless {
    next: u32,
}

impl ElementSource for Endless {
    type Item = u32;

    fn might_have_next(&mut self) -> bool {
        true
    }

    fn poll_next(&mut self) -> Result<Option<u32>, PipeError> {
        self.next += 1;
        Ok(Some(self.next))
    }
}

// ── Exhaustion ───────────────────────────────────────────────────

#[test]
fn drains_in_order_and_closes_once() {
    let closes = counter();
    let mut iter = iter_over(vec![1, 2, 3], &closes);

    let mut seen = Vec::new();
    while iter.has_next() {
        match iter.next_element() {
            Ok(value) => seen.push(value),
            Err(PipeError::IterationExhausted) => break,
            Err(error) => panic!("unexpected error: {error}"),
        }
    }

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(closes.get(), 1);
    assert!(iter.is_closed());
    assert!(!iter.has_next());
}

#[test]
fn empty_source_reports_exhaustion_and_closes() {
    let closes = counter();
    let mut iter = iter_over(Vec::new(), &closes);

    assert!(iter.has_next(), "hint is optimistic until the source is polled");
    assert!(matches!(iter.next_element(), Err(PipeError::IterationExhausted)));
    assert_eq!(closes.get(), 1);
}

#[test]
fn next_after_exhaustion_fails_without_closing_again() {
    let closes = counter();
    let mut iter = iter_over(vec![7], &closes);

    assert_eq!(iter.next_element().expect("first element"), 7);
    assert!(matches!(iter.next_element(), Err(PipeError::IterationExhausted)));
    assert!(matches!(iter.next_element(), Err(PipeError::IterationExhausted)));
    assert_eq!(closes.get(), 1);
}

// ── Explicit close ───────────────────────────────────────────────

#[test]
fn close_is_idempotent() {
    let closes = counter();
    let mut iter = iter_over(vec![1, 2, 3], &closes);

    iter.close().expect("first close");
    iter.close().expect("second close");
    iter.close().expect("third close");

    assert_eq!(closes.get(), 1);
}

#[test]
fn close_then_next_is_exhausted() {
    let closes = counter();
    let mut iter = iter_over(vec![1, 2, 3], &closes);

    iter.close().expect("close");
    assert!(!iter.has_next());
    assert!(matches!(iter.next_element(), Err(PipeError::IterationExhausted)));
    assert_eq!(closes.get(), 1);
}

#[test]
fn close_stops_an_endless_source() {
    let closes = counter();
    let mut iter = ClosingIterator::new(Endless { next: 0 }, counted_closer(&closes));

    assert_eq!(iter.next_element().expect("first"), 1);
    assert_eq!(iter.next_element().expect("second"), 2);
    assert!(iter.has_next());

    iter.close().expect("close");
    assert!(!iter.has_next());
    assert_eq!(closes.get(), 1);
}

#[test]
fn close_failure_is_returned_once() {
    let mut iter = ClosingIterator::from_fn(
        || Ok(Some(1_u32)),
        || {
            Err(PipeError::Connection {
                stream: "front-door".to_string(),
                reason: "reset by peer".to_string(),
            })
        },
    );

    assert!(matches!(iter.close(), Err(PipeError::Connection { .. })));
    assert!(iter.close().is_ok());
}

// ── Drop ─────────────────────────────────────────────────────────

#[test]
fn drop_closes_an_open_iterator() {
    let closes = counter();
    {
        let mut iter = iter_over(vec![1, 2, 3], &closes);
        assert_eq!(iter.next_element().expect("first"), 1);
    }
    assert_eq!(closes.get(), 1);
}

#[test]
fn drop_after_close_does_not_close_again() {
    let closes = counter();
    {
        let mut iter = iter_over(vec![1], &closes);
        iter.close().expect("close");
    }
    assert_eq!(closes.get(), 1);
}

// ── Source errors ────────────────────────────────────────────────

#[test]
fn source_error_passes_through_and_leaves_iterator_open() {
    let closes = counter();
    let mut polls = 0;
    let mut iter = ClosingIterator::from_fn(
        move || {
            polls += 1;
            if polls == 2 {
                Err(PipeError::Decode("corrupt cluster".to_string()))
            } else {
                Ok(Some(polls))
            }
        },
        counted_closer(&closes),
    );

    assert_eq!(iter.next_element().expect("first"), 1);
    assert!(matches!(iter.next_element(), Err(PipeError::Decode(_))));
    assert!(!iter.is_closed());
    assert_eq!(closes.get(), 0);

    iter.close().expect("close");
    assert_eq!(closes.get(), 1);
}

// ── std::iter::Iterator ──────────────────────────────────────────

#[test]
fn iterator_adapter_collects_and_closes() {
    let closes = counter();
    let iter = iter_over(vec![4, 5, 6], &closes);

    let values: Vec<u32> = iter.collect::<Result<_, _>>().expect("collect");
    assert_eq!(values, vec![4, 5, 6]);
    assert_eq!(closes.get(), 1);
}

#[test]
fn iterator_adapter_take_closes_on_drop() {
    let closes = counter();
    let iter = ClosingIterator::new(Endless { next: 0 }, counted_closer(&closes));

    let values: Vec<u32> = iter.take(3).map(|item| item.expect("item")).collect();
    assert_eq!(values, vec![1, 2, 3]);
    assert_eq!(closes.get(), 1);
}

#[test]
fn debug_shows_state() {
    let closes = counter();
    let mut iter = iter_over(vec![1], &closes);
    assert!(format!("{iter:?}").contains("open"));
    iter.close().expect("close");
    assert!(format!("{iter:?}").contains("closed"));
}
