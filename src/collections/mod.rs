//! Reactive collections - the observer layer.
//!
//! There is no ambient proxy facility here, so observation is carried by
//! explicit accessor types: [`ReactiveRecord`] and [`ReactiveList`] over
//! the shared dynamic [`Value`] model, and the typed [`ReactiveMap`] /
//! [`ReactiveSet`] collections. Every read routes through a per-cell dep
//! table; every write classifies itself (ADD / SET / DELETE / CLEAR)
//! before triggering.

pub mod list;
pub mod map;
pub mod record;
pub mod set;
pub mod value;

pub use list::ReactiveList;
pub use map::ReactiveMap;
pub use record::{ReactiveRecord, ReactiveValue};
pub use set::ReactiveSet;
pub use value::{RawList, RawMap, Value};
