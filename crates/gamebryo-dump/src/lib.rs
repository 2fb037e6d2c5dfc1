//! Forensic runtime-object reader for Xbox 360 minidumps of a
//! Gamebryo/Bethesda-engine title.
//!
//! Given a dump file plus its parsed memory map, the crate recovers live
//! C++ objects straight from the captured heap:
//!
//! - VA ↔ file-offset translation and pointer classification
//! - build-specific struct layouts (Debug / Release Beta / Release)
//! - form readers for NPCs, creatures, factions, items, packages, land,
//!   scripts, and projectiles, driven by pre-located candidates
//! - heuristic heap scanners for Gamebryo meshes, textures, and the
//!   scene-graph nodes that own them
//! - an MSVC RTTI walker with a vtable-frequency census
//!
//! All multi-byte scalars in the dump are big-endian (PowerPC). Readers
//! never panic on damaged input -- a structural mismatch is an absence,
//! not an error.
//!
//! # Example
//!
//! ```no_run
//! use gamebryo_dump::{DumpAnalyzer, MemoryMap};
//! # fn segments_from_minidump() -> Vec<gamebryo_dump::MemorySegment> { Vec::new() }
//! # fn modules_from_minidump() -> Vec<gamebryo_dump::Module> { Vec::new() }
//!
//! // Segments and modules come from the external minidump stream parser.
//! let map = MemoryMap::new(segments_from_minidump(), modules_from_minidump());
//! let analyzer = DumpAnalyzer::open("crash.dmp", map).unwrap();
//! let result = analyzer.analyze(&[]);
//! println!(
//!     "{} records, {} meshes, {} textures",
//!     result.summary.records_produced,
//!     result.summary.meshes_found,
//!     result.summary.textures_found,
//! );
//! ```

pub mod accessor;
pub mod analysis;
pub mod build_profile;
pub mod context;
pub mod error;
pub mod form_actor;
pub mod form_faction;
pub mod form_item;
pub mod form_land;
pub mod form_package;
pub mod form_projectile;
pub mod form_script;
pub mod form_types;
pub mod heap_scan;
pub mod io_utils;
pub mod list_walk;
pub mod memory_map;
pub mod mesh_scan;
pub mod progress;
pub mod rtti;
pub mod scene_graph;
pub mod texture_scan;

pub use accessor::DumpAccessor;
pub use analysis::{AnalysisResult, AnalysisSummary, DiagnosticReport, DumpAnalyzer};
pub use build_profile::{BuildKind, BuildProfile};
pub use context::{RuntimeContext, MAX_LIST_ITEMS};
pub use error::DumpError;
pub use form_types::{FormCandidate, FormType, RecordHeader, TypedRecord};
pub use memory_map::{MemoryMap, MemorySegment, Module, PointerClass};
pub use mesh_scan::ExtractedMesh;
pub use progress::{new_cancel_token, new_counter, CancelToken, ProgressCounter};
pub use rtti::{CensusEntry, RttiResolver, RttiResult};
pub use scene_graph::SceneGraphInfo;
pub use texture_scan::{ExtractedTexture, TextureFormat};
