//! Top-level entry point: open a dump and drive the analysis pipeline.
//!
//! The analyzer composes the accessor, memory map, and build profile, then
//! runs the phases in order: form readers over pre-located candidates,
//! mesh scan, texture scan, scene-graph walk, RTTI census. It joins
//! results (records by FormID, scene nodes by mesh offset) and reports
//! counts; it never interprets the records beyond collection. The
//! cancellation token is observed between phases and between region groups
//! inside each scan.

use crate::accessor::DumpAccessor;
use crate::build_profile::BuildProfile;
use crate::context::RuntimeContext;
use crate::form_types::{FormCandidate, FormType, TypedRecord};
use crate::memory_map::MemoryMap;
use crate::mesh_scan::{self, ExtractedMesh};
use crate::progress::{self, CancelToken, ProgressCounter};
use crate::rtti::{CensusEntry, RttiResolver};
use crate::scene_graph::{self, SceneGraphInfo};
use crate::texture_scan::{self, ExtractedTexture};
use crate::{
    form_actor, form_faction, form_item, form_land, form_package, form_projectile, form_script,
};
use crate::DumpError;
use std::collections::HashSet;
use std::path::Path;

/// Per-run counts surfaced to the caller; nothing here aborts the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub candidates_seen: usize,
    pub records_produced: usize,
    pub candidates_rejected: usize,
    pub meshes_found: usize,
    pub textures_found: usize,
    pub scene_nodes_found: usize,
    pub census_entries: usize,
    pub cancelled: bool,
}

/// Everything one analysis pass recovers.
pub struct AnalysisResult {
    pub records: Vec<TypedRecord>,
    pub meshes: Vec<ExtractedMesh>,
    pub textures: Vec<ExtractedTexture>,
    pub scene_nodes: Vec<SceneGraphInfo>,
    pub census: Vec<CensusEntry>,
    pub summary: AnalysisSummary,
}

/// A dump opened for analysis.
pub struct DumpAnalyzer {
    accessor: DumpAccessor,
    map: MemoryMap,
    profile: BuildProfile,
}

impl DumpAnalyzer {
    /// Open a dump file via memory mapping. The memory map comes from the
    /// minidump stream parser; the build profile is derived from its
    /// module list.
    pub fn open(path: impl AsRef<Path>, map: MemoryMap) -> Result<Self, DumpError> {
        Self::from_accessor(DumpAccessor::open_mmap(path)?, map)
    }

    /// Wrap an in-memory dump image (synthetic tests, pre-read buffers).
    pub fn from_bytes(data: Vec<u8>, map: MemoryMap) -> Result<Self, DumpError> {
        Self::from_accessor(DumpAccessor::from_bytes(data), map)
    }

    fn from_accessor(accessor: DumpAccessor, map: MemoryMap) -> Result<Self, DumpError> {
        if map.segments().is_empty() {
            return Err(DumpError::EmptyMemoryMap);
        }
        let file_size = accessor.len();
        for seg in map.segments() {
            if seg.end_offset() > file_size {
                return Err(DumpError::Truncated {
                    offset: seg.file_offset,
                    needed: seg.size as u64,
                    file_size,
                });
            }
        }
        let profile = BuildProfile::detect(map.modules());
        Ok(Self {
            accessor,
            map,
            profile,
        })
    }

    /// Override the detected build profile (e.g. when the caller confirmed
    /// the shift out of band).
    pub fn with_profile(mut self, profile: BuildProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn build_profile(&self) -> BuildProfile {
        self.profile
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn context(&self) -> RuntimeContext<'_> {
        RuntimeContext::new(&self.accessor, &self.map, self.profile.shift)
    }

    /// Run every phase. Convenience wrapper over [`analyze_with`] without
    /// progress or cancellation.
    ///
    /// [`analyze_with`]: Self::analyze_with
    pub fn analyze(&self, candidates: &[FormCandidate]) -> AnalysisResult {
        self.analyze_with(candidates, None, None)
    }

    pub fn analyze_with(
        &self,
        candidates: &[FormCandidate],
        counter: Option<&ProgressCounter>,
        cancel: Option<&CancelToken>,
    ) -> AnalysisResult {
        let ctx = self.context();
        let mut summary = AnalysisSummary {
            candidates_seen: candidates.len(),
            ..AnalysisSummary::default()
        };

        let records = self.read_candidates(&ctx, candidates, counter, &mut summary);

        let cancelled = |s: &mut AnalysisSummary| {
            let hit = cancel.is_some_and(progress::is_cancelled);
            s.cancelled |= hit;
            hit
        };

        let meshes = if cancelled(&mut summary) {
            Vec::new()
        } else {
            mesh_scan::scan_meshes(&ctx, counter, cancel)
        };
        summary.meshes_found = meshes.len();

        let textures = if cancelled(&mut summary) {
            Vec::new()
        } else {
            texture_scan::scan_textures(&ctx, counter, cancel)
        };
        summary.textures_found = textures.len();

        let scene_nodes = if cancelled(&mut summary) {
            Vec::new()
        } else {
            scene_graph::scan_scene_graph(&ctx, &meshes, counter, cancel)
        };
        summary.scene_nodes_found = scene_nodes.len();

        let census = if cancelled(&mut summary) {
            Vec::new()
        } else {
            RttiResolver::new(&ctx).census(counter, cancel)
        };
        summary.census_entries = census.len();

        AnalysisResult {
            records,
            meshes,
            textures,
            scene_nodes,
            census,
            summary,
        }
    }

    /// Dispatch each candidate to its reader, deduplicating by FormID
    /// (first hit wins) and counting rejections.
    fn read_candidates(
        &self,
        ctx: &RuntimeContext,
        candidates: &[FormCandidate],
        counter: Option<&ProgressCounter>,
        summary: &mut AnalysisSummary,
    ) -> Vec<TypedRecord> {
        let mut records = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();
        for candidate in candidates {
            match read_candidate(ctx, candidate) {
                Some(record) => {
                    if seen.insert(record.form_id()) {
                        records.push(record);
                    }
                }
                None => summary.candidates_rejected += 1,
            }
            if let Some(c) = counter {
                progress::tick(c);
            }
        }
        records.sort_by_key(|r| r.source_offset());
        summary.records_produced = records.len();
        records
    }

    /// Stage-by-stage diagnostics without cascading failures.
    pub fn diagnose(&self) -> DiagnosticReport {
        let ctx = self.context();
        let mut stages = Vec::new();

        let heap_groups = self.map.heap_region_groups();
        let heap_bytes: u64 = heap_groups.iter().map(|g| g.size).sum();
        stages.push(DiagnosticStage {
            name: "Memory map".to_string(),
            success: !self.map.segments().is_empty(),
            detail: format!(
                "{} segments, {} modules, {} heap region groups ({} bytes)",
                self.map.segments().len(),
                self.map.modules().len(),
                heap_groups.len(),
                heap_bytes
            ),
        });

        stages.push(DiagnosticStage {
            name: "Build profile".to_string(),
            success: self.profile.shift != 0 || self.map.modules().is_empty(),
            detail: format!("{:?}, shift {}", self.profile.kind, self.profile.shift),
        });

        let meshes = mesh_scan::scan_meshes(&ctx, None, None);
        stages.push(DiagnosticStage {
            name: "Mesh scan".to_string(),
            success: true,
            detail: format!("{} unique meshes", meshes.len()),
        });

        let textures = texture_scan::scan_textures(&ctx, None, None);
        stages.push(DiagnosticStage {
            name: "Texture scan".to_string(),
            success: true,
            detail: format!(
                "{} unique textures ({} named)",
                textures.len(),
                textures.iter().filter(|t| t.filename.is_some()).count()
            ),
        });

        let census = RttiResolver::new(&ctx).census(None, None);
        stages.push(DiagnosticStage {
            name: "RTTI census".to_string(),
            success: true,
            detail: format!(
                "{} resolved vtables ({} TESForm-derived)",
                census.len(),
                census.iter().filter(|e| e.is_tes_form).count()
            ),
        });

        DiagnosticReport {
            file_size: self.accessor.len(),
            stages,
        }
    }
}

/// Route a candidate to the reader its expected form type names.
pub fn read_candidate(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<TypedRecord> {
    match FormType::from_code(candidate.expected_form_type)? {
        FormType::Npc => form_actor::read_npc(ctx, candidate).map(TypedRecord::Npc),
        FormType::Creature => form_actor::read_creature(ctx, candidate).map(TypedRecord::Creature),
        FormType::Faction => form_faction::read_faction(ctx, candidate).map(TypedRecord::Faction),
        FormType::Weapon => form_item::read_weapon(ctx, candidate).map(TypedRecord::Weapon),
        FormType::Armor => form_item::read_armor(ctx, candidate).map(TypedRecord::Armor),
        FormType::Ammo => form_item::read_ammo(ctx, candidate).map(TypedRecord::Ammo),
        FormType::Misc => form_item::read_misc(ctx, candidate).map(TypedRecord::Misc),
        FormType::Key => form_item::read_key(ctx, candidate).map(TypedRecord::Key),
        FormType::Container => {
            form_item::read_container(ctx, candidate).map(TypedRecord::Container)
        }
        FormType::Consumable => {
            form_item::read_consumable(ctx, candidate).map(TypedRecord::Consumable)
        }
        FormType::Package => form_package::read_package(ctx, candidate).map(TypedRecord::Package),
        FormType::Land => form_land::read_land(ctx, candidate).map(TypedRecord::Land),
        FormType::Script => form_script::read_script(ctx, candidate).map(TypedRecord::Script),
        FormType::Projectile => {
            form_projectile::read_projectile(ctx, candidate).map(TypedRecord::Projectile)
        }
    }
}

/// Stage-by-stage diagnostic result for a dump.
pub struct DiagnosticReport {
    pub file_size: u64,
    pub stages: Vec<DiagnosticStage>,
}

pub struct DiagnosticStage {
    pub name: String,
    pub success: bool,
    pub detail: String,
}

impl DiagnosticReport {
    pub fn print(&self) {
        println!("=== Dump Diagnostic Report ===");
        println!(
            "File size: {} bytes ({:.1} MB)\n",
            self.file_size,
            self.file_size as f64 / 1e6
        );
        for stage in &self.stages {
            let status = if stage.success { "OK" } else { "FAIL" };
            println!("[{:>4}] {}", status, stage.name);
            for line in stage.detail.lines() {
                println!("       {}", line);
            }
        }
    }
}
