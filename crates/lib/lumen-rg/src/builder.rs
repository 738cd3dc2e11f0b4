//! Pass ordering and transient texture aliasing.
//!
//! The three stages run in sequence when a renderpack is compiled: passes are
//! topologically ordered, the usage range of every texture is computed
//! against that order, and textures with disjoint ranges get folded onto the
//! same allocation.

use std::collections::HashMap;

use lumen_rhi::renderpack::{RenderPassCreateInfo, TextureCreateInfo, BACKBUFFER_NAME};

use crate::error::GraphCompileError;

/// The window of pass indices in which a texture is alive.
///
/// Indices refer to positions in the *ordered* pass list. A default range
/// means the texture is never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub first_write_pass: u32,
    pub last_write_pass: u32,
    pub first_read_pass: u32,
    pub last_read_pass: u32,
}

impl Default for Range {
    fn default() -> Self {
        Self {
            first_write_pass: u32::MAX,
            last_write_pass: 0,
            first_read_pass: u32::MAX,
            last_read_pass: 0,
        }
    }
}

impl Range {
    pub fn has_writer(&self) -> bool {
        self.first_write_pass != u32::MAX
    }

    pub fn has_reader(&self) -> bool {
        self.first_read_pass != u32::MAX
    }

    pub fn is_used(&self) -> bool {
        self.has_writer() || self.has_reader()
    }

    /// A texture read before its first write carries data in from outside
    /// the frame, so its storage cannot be reused. A texture with no writer
    /// at all holds external data for the whole frame and never aliases.
    pub fn can_alias(&self) -> bool {
        self.has_writer() && (!self.has_reader() || self.first_write_pass <= self.first_read_pass)
    }

    pub fn first_used_pass(&self) -> u32 {
        self.first_write_pass.min(self.first_read_pass)
    }

    pub fn last_used_pass(&self) -> u32 {
        let last_write = if self.has_writer() { self.last_write_pass } else { 0 };
        let last_read = if self.has_reader() { self.last_read_pass } else { 0 };
        last_write.max(last_read)
    }

    pub fn is_disjoint_with(&self, other: &Range) -> bool {
        if !self.is_used() || !other.is_used() {
            return true;
        }
        self.last_used_pass() < other.first_used_pass()
            || other.last_used_pass() < self.first_used_pass()
    }

    fn record_write(&mut self, pass_index: u32) {
        self.first_write_pass = self.first_write_pass.min(pass_index);
        self.last_write_pass = self.last_write_pass.max(pass_index);
    }

    fn record_read(&mut self, pass_index: u32) {
        self.first_read_pass = self.first_read_pass.min(pass_index);
        self.last_read_pass = self.last_read_pass.max(pass_index);
    }

    fn union(&self, other: &Range) -> Range {
        Range {
            first_write_pass: self.first_write_pass.min(other.first_write_pass),
            last_write_pass: self.last_write_pass.max(other.last_write_pass),
            first_read_pass: self.first_read_pass.min(other.first_read_pass),
            last_read_pass: self.last_read_pass.max(other.last_read_pass),
        }
    }
}

/// Topologically order `passes`, honoring both explicit dependencies and the
/// implicit ones formed when one pass reads a texture another writes.
///
/// The sort is stable: among passes whose dependencies are satisfied, the one
/// declared first runs first, so the same renderpack always compiles to the
/// same order.
pub fn order_passes(
    passes: &[RenderPassCreateInfo],
) -> Result<Vec<usize>, GraphCompileError> {
    let index_of: HashMap<&str, usize> = passes
        .iter()
        .enumerate()
        .map(|(index, pass)| (pass.name.as_str(), index))
        .collect();

    // writer index per texture, for the implicit read-after-write edges
    let mut writers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, pass) in passes.iter().enumerate() {
        for output in &pass.texture_outputs {
            writers.entry(output.as_str()).or_default().push(index);
        }
    }

    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); passes.len()];
    for (index, pass) in passes.iter().enumerate() {
        for dependency in &pass.dependencies {
            let dep_index = *index_of.get(dependency.as_str()).ok_or_else(|| {
                GraphCompileError::UnknownPass {
                    pass: pass.name.clone(),
                    dependency: dependency.clone(),
                }
            })?;
            dependencies[index].push(dep_index);
        }
        for input in &pass.texture_inputs {
            if let Some(writer_indices) = writers.get(input.as_str()) {
                for &writer in writer_indices {
                    if writer != index {
                        dependencies[index].push(writer);
                    }
                }
            }
        }
        dependencies[index].sort_unstable();
        dependencies[index].dedup();
    }

    let mut ordered = Vec::with_capacity(passes.len());
    let mut placed = vec![false; passes.len()];
    while ordered.len() < passes.len() {
        let mut placed_any = false;
        for index in 0..passes.len() {
            if placed[index] {
                continue;
            }
            if dependencies[index].iter().all(|&dep| placed[dep]) {
                placed[index] = true;
                ordered.push(index);
                placed_any = true;
            }
        }
        if !placed_any {
            let stuck: Vec<String> = passes
                .iter()
                .enumerate()
                .filter(|(index, _)| !placed[*index])
                .map(|(_, pass)| pass.name.clone())
                .collect();
            return Err(GraphCompileError::CyclicDependency { passes: stuck });
        }
    }

    Ok(ordered)
}

/// Per-texture usage against the ordered pass list.
pub struct TextureUsageOrder {
    pub ranges: HashMap<String, Range>,
    /// Texture names in order of first touch. Textures no pass references do
    /// not appear here.
    pub first_use_order: Vec<String>,
}

/// Compute, for every texture, the range of ordered-pass indices that touch
/// it, plus the textures in first-use order. The backbuffer is managed by
/// the swapchain and is not tracked.
pub fn determine_usage_order_of_textures(
    passes: &[RenderPassCreateInfo],
    order: &[usize],
) -> TextureUsageOrder {
    let mut ranges: HashMap<String, Range> = HashMap::new();
    let mut first_use_order: Vec<String> = Vec::new();

    for (position, &pass_index) in order.iter().enumerate() {
        let pass = &passes[pass_index];
        let position = position as u32;
        for output in &pass.texture_outputs {
            if output == BACKBUFFER_NAME {
                continue;
            }
            if !ranges.contains_key(output) {
                first_use_order.push(output.clone());
            }
            ranges.entry(output.clone()).or_default().record_write(position);
        }
        for input in &pass.texture_inputs {
            if input == BACKBUFFER_NAME {
                continue;
            }
            if !ranges.contains_key(input) {
                first_use_order.push(input.clone());
            }
            ranges.entry(input.clone()).or_default().record_read(position);
        }
    }

    TextureUsageOrder { ranges, first_use_order }
}

/// Shape equality for aliasing: two textures can only share storage when the
/// allocation they need is identical.
fn same_shape(a: &TextureCreateInfo, b: &TextureCreateInfo) -> bool {
    a.format == b.format && a.dimensions == b.dimensions && a.usage == b.usage
}

/// Map every texture name onto the name of the allocation that backs it.
///
/// Greedy first-fit over first-use order: each texture tries the already
/// placed allocations in order and takes the first one with a compatible
/// shape and a disjoint usage range. First-fit is not optimal when ranges
/// interleave awkwardly, but it is deterministic and close enough in
/// practice.
pub fn determine_aliasing_of_textures(
    textures: &[TextureCreateInfo],
    usage: &TextureUsageOrder,
) -> HashMap<String, String> {
    struct Slot<'a> {
        name: &'a str,
        info: &'a TextureCreateInfo,
        claimed: Range,
        /// Persistent textures and textures carrying external data keep
        /// their allocation to themselves.
        shareable: bool,
    }

    let info_of: HashMap<&str, &TextureCreateInfo> = textures
        .iter()
        .map(|texture| (texture.name.as_str(), texture))
        .collect();

    // used textures in first-use order, then the untouched rest
    let mut visit: Vec<&TextureCreateInfo> = usage
        .first_use_order
        .iter()
        .filter_map(|name| info_of.get(name.as_str()).copied())
        .collect();
    for texture in textures {
        if !usage.ranges.contains_key(&texture.name) {
            visit.push(texture);
        }
    }

    let mut slots: Vec<Slot<'_>> = Vec::new();
    let mut aliases = HashMap::with_capacity(textures.len());

    for texture in visit {
        let range = usage.ranges.get(&texture.name).copied().unwrap_or_default();
        let may_alias = !texture.persistent && range.can_alias();

        let mut backing = None;
        if may_alias {
            for slot in slots.iter_mut() {
                if slot.shareable
                    && same_shape(slot.info, texture)
                    && slot.claimed.is_disjoint_with(&range)
                {
                    slot.claimed = slot.claimed.union(&range);
                    backing = Some(slot.name.to_owned());
                    break;
                }
            }
        }

        let backing = match backing {
            Some(name) => {
                log::debug!("Aliasing texture {} onto {}", texture.name, name);
                name
            }
            None => {
                slots.push(Slot {
                    name: &texture.name,
                    info: texture,
                    claimed: range,
                    shareable: may_alias,
                });
                texture.name.clone()
            }
        };
        aliases.insert(texture.name.clone(), backing);
    }

    aliases
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_rhi::renderpack::PixelFormat;

    fn pass(name: &str) -> RenderPassCreateInfo {
        RenderPassCreateInfo::new(name)
    }

    fn texture(name: &str) -> TextureCreateInfo {
        TextureCreateInfo::render_target(name, PixelFormat::Rgba16F)
    }

    /// Wrap hand-built ranges the way the real pipeline would order them.
    fn usage_of(ranges: HashMap<String, Range>) -> TextureUsageOrder {
        let mut first_use_order: Vec<String> = ranges
            .iter()
            .filter(|(_, range)| range.is_used())
            .map(|(name, _)| name.clone())
            .collect();
        first_use_order.sort_by_key(|name| (ranges[name].first_used_pass(), name.clone()));
        TextureUsageOrder { ranges, first_use_order }
    }

    #[test]
    fn order_honors_explicit_dependencies() {
        let mut composite = pass("composite").writes(BACKBUFFER_NAME);
        composite.dependencies.push("gbuffer".to_owned());
        let passes = vec![composite, pass("gbuffer").writes("gbuffer_color")];

        let order = order_passes(&passes).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn order_honors_implicit_texture_dependencies() {
        let passes = vec![
            pass("composite").reads("gbuffer_color").writes(BACKBUFFER_NAME),
            pass("gbuffer").reads("shadow_map").writes("gbuffer_color"),
            pass("shadow").writes("shadow_map"),
        ];

        let order = order_passes(&passes).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn order_is_stable_for_independent_passes() {
        let passes = vec![
            pass("a").writes("tex_a"),
            pass("b").writes("tex_b"),
            pass("c").writes("tex_c"),
        ];

        // no constraints between them, so declaration order is kept
        let order = order_passes(&passes).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
        // and a second run agrees exactly
        assert_eq!(order_passes(&passes).unwrap(), order);
    }

    #[test]
    fn cycle_is_reported_with_its_passes() {
        let mut a = pass("a").writes("tex_a");
        a.dependencies.push("b".to_owned());
        let mut b = pass("b").writes("tex_b");
        b.dependencies.push("a".to_owned());
        let passes = vec![a, b, pass("free").writes("tex_free")];

        match order_passes(&passes) {
            Err(GraphCompileError::CyclicDependency { passes }) => {
                assert_eq!(passes, vec!["a".to_owned(), "b".to_owned()]);
            }
            other => panic!("expected cycle error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut lonely = pass("lonely").writes("tex");
        lonely.dependencies.push("missing".to_owned());

        assert!(matches!(
            order_passes(&[lonely]),
            Err(GraphCompileError::UnknownPass { .. })
        ));
    }

    #[test]
    fn usage_ranges_track_reads_and_writes() {
        let passes = vec![
            pass("shadow").writes("shadow_map"),
            pass("gbuffer").reads("shadow_map").writes("gbuffer_color"),
            pass("composite").reads("gbuffer_color").writes(BACKBUFFER_NAME),
        ];
        let order = order_passes(&passes).unwrap();
        let usage = determine_usage_order_of_textures(&passes, &order);

        let shadow = usage.ranges["shadow_map"];
        assert_eq!(shadow.first_write_pass, 0);
        assert_eq!(shadow.last_read_pass, 1);
        assert!(shadow.has_writer() && shadow.has_reader());

        let color = usage.ranges["gbuffer_color"];
        assert_eq!(color.first_write_pass, 1);
        assert_eq!(color.last_read_pass, 2);

        // textures come out in first-use order
        assert_eq!(usage.first_use_order, vec!["shadow_map", "gbuffer_color"]);

        // the backbuffer is never tracked
        assert!(!usage.ranges.contains_key(BACKBUFFER_NAME));
    }

    #[test]
    fn disjoint_ranges_alias_onto_one_allocation() {
        // tex_early is dead after pass 1, tex_late is born at pass 2
        let mut ranges = HashMap::new();
        ranges.insert(
            "tex_early".to_owned(),
            Range {
                first_write_pass: 0,
                last_write_pass: 0,
                first_read_pass: 1,
                last_read_pass: 1,
            },
        );
        ranges.insert(
            "tex_late".to_owned(),
            Range {
                first_write_pass: 2,
                last_write_pass: 2,
                first_read_pass: 3,
                last_read_pass: 3,
            },
        );

        let textures = vec![texture("tex_early"), texture("tex_late")];
        let aliases = determine_aliasing_of_textures(&textures, &usage_of(ranges));

        assert_eq!(aliases["tex_early"], "tex_early");
        assert_eq!(aliases["tex_late"], "tex_early");
    }

    #[test]
    fn overlapping_ranges_do_not_alias() {
        let mut ranges = HashMap::new();
        ranges.insert(
            "a".to_owned(),
            Range {
                first_write_pass: 0,
                last_write_pass: 0,
                first_read_pass: 2,
                last_read_pass: 2,
            },
        );
        ranges.insert(
            "b".to_owned(),
            Range {
                first_write_pass: 1,
                last_write_pass: 1,
                first_read_pass: 2,
                last_read_pass: 2,
            },
        );

        let aliases =
            determine_aliasing_of_textures(&[texture("a"), texture("b")], &usage_of(ranges));
        assert_eq!(aliases["a"], "a");
        assert_eq!(aliases["b"], "b");
    }

    #[test]
    fn mismatched_shapes_do_not_alias() {
        let mut ranges = HashMap::new();
        ranges.insert(
            "a".to_owned(),
            Range {
                first_write_pass: 0,
                last_write_pass: 0,
                first_read_pass: 1,
                last_read_pass: 1,
            },
        );
        ranges.insert(
            "b".to_owned(),
            Range {
                first_write_pass: 2,
                last_write_pass: 2,
                first_read_pass: 3,
                last_read_pass: 3,
            },
        );

        let a = texture("a");
        let b = TextureCreateInfo::render_target("b", PixelFormat::Rgba8);
        let aliases = determine_aliasing_of_textures(&[a, b], &usage_of(ranges));
        assert_eq!(aliases["b"], "b");
    }

    #[test]
    fn persistent_textures_never_alias() {
        let mut ranges = HashMap::new();
        ranges.insert(
            "history".to_owned(),
            Range {
                first_write_pass: 0,
                last_write_pass: 0,
                first_read_pass: 0,
                last_read_pass: 0,
            },
        );
        ranges.insert(
            "scratch".to_owned(),
            Range {
                first_write_pass: 2,
                last_write_pass: 2,
                first_read_pass: 3,
                last_read_pass: 3,
            },
        );

        let mut history = texture("history");
        history.persistent = true;
        let aliases =
            determine_aliasing_of_textures(&[history, texture("scratch")], &usage_of(ranges));
        assert_eq!(aliases["scratch"], "scratch");
    }

    #[test]
    fn read_only_textures_never_alias() {
        // "external" has readers but no writer in the frame, so its contents
        // come from outside and its storage must stay untouched
        let mut ranges = HashMap::new();
        ranges.insert(
            "scratch".to_owned(),
            Range {
                first_write_pass: 0,
                last_write_pass: 0,
                first_read_pass: 1,
                last_read_pass: 1,
            },
        );
        let mut external = Range::default();
        external.record_read(3);
        external.record_read(4);
        ranges.insert("external".to_owned(), external);

        assert!(!external.can_alias());

        let textures = vec![texture("scratch"), texture("external")];
        let aliases = determine_aliasing_of_textures(&textures, &usage_of(ranges));
        assert_eq!(aliases["external"], "external");
        // and nothing folds onto it either
        assert_eq!(aliases["scratch"], "scratch");
    }

    #[test]
    fn aliasing_scans_in_first_use_order() {
        // declared in reverse of their first use; the earlier-used texture
        // must become the backing allocation
        let mut ranges = HashMap::new();
        ranges.insert(
            "late".to_owned(),
            Range {
                first_write_pass: 2,
                last_write_pass: 2,
                first_read_pass: 3,
                last_read_pass: 3,
            },
        );
        ranges.insert(
            "early".to_owned(),
            Range {
                first_write_pass: 0,
                last_write_pass: 0,
                first_read_pass: 1,
                last_read_pass: 1,
            },
        );

        let textures = vec![texture("late"), texture("early")];
        let aliases = determine_aliasing_of_textures(&textures, &usage_of(ranges));
        assert_eq!(aliases["early"], "early");
        assert_eq!(aliases["late"], "early");
    }

    #[test]
    fn read_before_write_disables_aliasing() {
        let range = Range {
            first_write_pass: 2,
            last_write_pass: 2,
            first_read_pass: 0,
            last_read_pass: 0,
        };
        assert!(!range.can_alias());
    }

    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self, bound: u32) -> u32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            (x % bound as u64) as u32
        }
    }

    #[test]
    fn aliased_textures_always_have_disjoint_lifetimes() {
        let mut rng = XorShift(0x2545_F491_4F6C_DD1D);

        for _ in 0..200 {
            let num_textures = 2 + rng.next(8) as usize;
            let mut ranges = HashMap::new();
            let mut textures = Vec::new();
            for i in 0..num_textures {
                let name = format!("tex{}", i);
                let range = if rng.next(4) == 0 {
                    // read-only, fed from outside the frame
                    let mut range = Range::default();
                    range.record_read(rng.next(16));
                    range
                } else {
                    let first_write = rng.next(16);
                    let last_read = first_write + rng.next(4);
                    Range {
                        first_write_pass: first_write,
                        last_write_pass: first_write,
                        first_read_pass: last_read,
                        last_read_pass: last_read,
                    }
                };
                ranges.insert(name.clone(), range);
                textures.push(texture(&name));
            }

            let aliases = determine_aliasing_of_textures(&textures, &usage_of(ranges.clone()));

            // no two textures sharing an allocation may ever be alive at
            // once, and read-only textures keep their storage to themselves
            for a in &textures {
                if !ranges[&a.name].has_writer() {
                    assert_eq!(aliases[&a.name], a.name);
                }
                for b in &textures {
                    if a.name == b.name {
                        continue;
                    }
                    if !ranges[&a.name].has_writer() {
                        assert_ne!(aliases[&b.name], a.name);
                    }
                    if aliases[&a.name] == aliases[&b.name] {
                        assert!(
                            ranges[&a.name].is_disjoint_with(&ranges[&b.name]),
                            "{} and {} share {} but overlap",
                            a.name,
                            b.name,
                            aliases[&a.name]
                        );
                    }
                }
            }
        }
    }
}
