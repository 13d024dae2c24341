//! Domain Layer - filter language, compiled graph and field index
//!
//! This layer contains:
//! - Document values and geo primitives
//! - Operand matchers
//! - Filter expression parsing and canonical normalization
//! - The condition/subfilter/filter arena
//! - The field index
//! - Configuration
//!
//! RULES:
//! - No I/O operations
//! - No async code
//! - No locking; callers own synchronization

pub mod config;
pub mod expression;
pub mod field_index;
pub mod geo;
pub mod graph;
pub mod normalize;
pub mod operand;
pub mod value;

pub use config::{EngineConfig, EngineConfigBuilder, MAX_EXPANSION_LIMIT, MAX_GEO_PRECISION};
pub use expression::{FilterExpr, Predicate, MAX_NESTING};
pub use field_index::{FieldIndex, RangeIndex};
pub use geo::{BoundingBox, GeoPoint, GridCell};
pub use graph::{Condition, ConditionId, FilterEntry, FilterGraph, Subfilter, SubfilterId};
pub use normalize::{filter_id, normalize, Literal, NormalizedFilter, MATCH_ALL, MATCH_NONE};
pub use operand::{Operand, OperandKind, RangeBound, RangeBounds, RegexOperand};
pub use value::{flatten, lookup, Scalar};
