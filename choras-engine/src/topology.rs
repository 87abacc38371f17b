use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use choras_core::diagnostics::Diagnostic;
use choras_core::document::{Document, EntityId, Mesh};
use choras_core::geometry::Point3;
use tracing::{debug, warn};

/// 未指定时的体积物理组名。
pub const DEFAULT_VOLUME_NAME: &str = "RoomVolume";

/// 物理面分组方式，每次转换只使用一种。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingMode {
    /// 按材质键分组（显式材质名 → `M_<材质索引>` → `M_<图层索引>` → `M_1`）。
    #[default]
    PerMaterial,
    /// 按对象标识分组，缺失时使用 `Object_<实体 ID>`。
    PerObject,
}

impl GroupingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupingMode::PerMaterial => "per-material",
            GroupingMode::PerObject => "per-object",
        }
    }

    fn group_key(self, id: EntityId, mesh: &Mesh) -> String {
        match self {
            GroupingMode::PerMaterial => physical_name(&mesh.material_key()),
            GroupingMode::PerObject => physical_name(&object_key(id, mesh)),
        }
    }
}

impl fmt::Display for GroupingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per-material" | "material" => Ok(GroupingMode::PerMaterial),
            "per-object" | "object" => Ok(GroupingMode::PerObject),
            other => Err(format!("未知的分组方式：{other}")),
        }
    }
}

/// 网格的稳定对象标识。
pub fn object_key(id: EntityId, mesh: &Mesh) -> String {
    match mesh.object_id.as_deref().filter(|object| !object.is_empty()) {
        Some(object) => object.to_string(),
        None => format!("Object_{}", id.get()),
    }
}

/// 物理组名写在 GEO 的双引号里，引号与控制字符替换为 `_`。
pub fn physical_name(raw: &str) -> String {
    raw.chars()
        .map(|ch| if ch == '"' || ch.is_control() { '_' } else { ch })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub grouping: GroupingMode,
    pub volume_name: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            grouping: GroupingMode::default(),
            volume_name: DEFAULT_VOLUME_NAME.to_string(),
        }
    }
}

/// 以百分之一为单位量化后的坐标，作为点去重键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantizedPoint {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl QuantizedPoint {
    /// 先取一位小数；若与两位小数的结果不同则保留两位，两者合起来等价于按两位小数取整。
    /// 恰在两个百分位中间时取偶数。
    pub fn from_point(point: Point3) -> Self {
        Self {
            x: quantize(point.x()),
            y: quantize(point.y()),
            z: quantize(point.z()),
        }
    }

    /// 按写出格式返回三个坐标分量的文本。
    pub fn formatted(self) -> [String; 3] {
        [
            format_coordinate(self.x),
            format_coordinate(self.y),
            format_coordinate(self.z),
        ]
    }
}

#[inline]
fn quantize(value: f64) -> i64 {
    (value * 100.0).round_ties_even() as i64
}

/// 量化值只有一位有效小数时输出一位，否则输出两位。
pub fn format_coordinate(hundredths: i64) -> String {
    let sign = if hundredths < 0 { "-" } else { "" };
    let magnitude = hundredths.unsigned_abs();
    let whole = magnitude / 100;
    let fraction = magnitude % 100;
    if fraction % 10 == 0 {
        format!("{sign}{whole}.{}", fraction / 10)
    } else {
        format!("{sign}{whole}.{fraction:02}")
    }
}

/// 物理面组。组名按首次出现顺序排列。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalGroup {
    pub name: String,
    pub surfaces: Vec<u32>,
}

/// 拓扑提取结果。点、线、环的 ID 都从 1 开始，等于其在列表中的位置加一；
/// 平面 ID 与环 ID 一一对应。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundaryDescription {
    pub points: Vec<QuantizedPoint>,
    /// 无向线段，端点按升序存放。
    pub lines: Vec<(u32, u32)>,
    /// 带符号的线 ID，负号表示逆着升序方向遍历。
    pub loops: Vec<Vec<i64>>,
    pub groups: Vec<PhysicalGroup>,
    pub volume_name: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl BoundaryDescription {
    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    #[inline]
    pub fn surface_count(&self) -> usize {
        self.loops.len()
    }

    pub fn line_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.lines.len()).map(|id| id as u32)
    }

    pub fn surface_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.loops.len()).map(|id| id as u32)
    }

    pub fn line(&self, id: i64) -> Option<(u32, u32)> {
        let index = usize::try_from(id.unsigned_abs()).ok()?.checked_sub(1)?;
        self.lines.get(index).copied()
    }

    pub fn group(&self, name: &str) -> Option<&PhysicalGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// 按遍历方向返回环经过的点 ID 序列。
    pub fn loop_points(&self, surface: u32) -> Option<Vec<u32>> {
        let index = (surface as usize).checked_sub(1)?;
        let signed = self.loops.get(index)?;
        signed
            .iter()
            .map(|&id| {
                let (low, high) = self.line(id)?;
                Some(if id > 0 { low } else { high })
            })
            .collect()
    }

    /// 检查每个环首尾相接。
    pub fn loop_is_closed(&self, surface: u32) -> bool {
        let Some(index) = (surface as usize).checked_sub(1) else {
            return false;
        };
        let Some(signed) = self.loops.get(index) else {
            return false;
        };
        let directed: Option<Vec<(u32, u32)>> = signed
            .iter()
            .map(|&id| {
                let (low, high) = self.line(id)?;
                Some(if id > 0 { (low, high) } else { (high, low) })
            })
            .collect();
        let Some(directed) = directed else {
            return false;
        };
        !directed.is_empty()
            && directed
                .iter()
                .zip(directed.iter().cycle().skip(1))
                .all(|(current, next)| current.1 == next.0)
    }
}

/// 将网格转换为去重的点、线、线环与物理组。每次调用使用独立的状态。
#[derive(Debug, Clone, Default)]
pub struct TopologyExtractor {
    options: ExtractOptions,
}

impl TopologyExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    pub fn extract(&self, document: &Document) -> BoundaryDescription {
        self.extract_meshes(document.meshes())
    }

    pub fn extract_meshes<'a, I>(&self, meshes: I) -> BoundaryDescription
    where
        I: IntoIterator<Item = (EntityId, &'a Mesh)>,
    {
        let mut state = ExtractionState::default();
        for (id, mesh) in meshes {
            let key = self.options.grouping.group_key(id, mesh);
            state.add_mesh(id, mesh, key);
        }
        let description = state.finish(physical_name(&self.options.volume_name));
        debug!(
            points = description.point_count(),
            lines = description.line_count(),
            surfaces = description.surface_count(),
            groups = description.groups.len(),
            grouping = %self.options.grouping,
            "拓扑提取完成"
        );
        description
    }
}

/// 单次提取的可变状态：点表、全局无向边集、每个面的有向链与分组。
#[derive(Debug, Default)]
struct ExtractionState {
    point_ids: HashMap<QuantizedPoint, u32>,
    points: Vec<QuantizedPoint>,
    edges: BTreeSet<(u32, u32)>,
    chains: Vec<Vec<(u32, u32)>>,
    groups: Vec<PhysicalGroup>,
    group_index: HashMap<String, usize>,
    diagnostics: Vec<Diagnostic>,
}

impl ExtractionState {
    fn point_id(&mut self, point: Point3) -> u32 {
        let key = QuantizedPoint::from_point(point);
        if let Some(&id) = self.point_ids.get(&key) {
            return id;
        }
        self.points.push(key);
        let id = self.points.len() as u32;
        self.point_ids.insert(key, id);
        id
    }

    fn add_mesh(&mut self, id: EntityId, mesh: &Mesh, group_key: String) {
        let ids: Vec<u32> = mesh
            .vertices
            .iter()
            .map(|&vertex| self.point_id(vertex))
            .collect();

        for (face_index, face) in mesh.faces.iter().enumerate() {
            let resolved: Option<Vec<u32>> = face
                .indices()
                .iter()
                .map(|&index| ids.get(index as usize).copied())
                .collect();
            let Some(resolved) = resolved.filter(|resolved| resolved.len() >= 3) else {
                self.reject(format!(
                    "实体 {} 的第 {face_index} 个面引用了不存在的顶点",
                    id.get()
                ));
                continue;
            };

            let mut distinct = resolved.clone();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < 3 {
                self.reject(format!(
                    "实体 {} 的第 {face_index} 个面去重后不足 3 个顶点",
                    id.get()
                ));
                continue;
            }

            let edges: Vec<(u32, u32)> = resolved
                .iter()
                .zip(resolved.iter().cycle().skip(1))
                .map(|(&from, &to)| (from, to))
                .filter(|(from, to)| from != to)
                .collect();
            if edges.len() < 3 {
                self.reject(format!(
                    "实体 {} 的第 {face_index} 个面去重后不足 3 条边",
                    id.get()
                ));
                continue;
            }

            let Some(chain) = stitch(edges) else {
                self.reject(format!(
                    "实体 {} 的第 {face_index} 个面的边无法拼成单一闭合环",
                    id.get()
                ));
                continue;
            };
            for &(from, to) in &chain {
                self.edges.insert((from.min(to), from.max(to)));
            }
            self.chains.push(chain);
            let surface = self.chains.len() as u32;
            self.assign_group(&group_key, surface);
        }
    }

    fn assign_group(&mut self, key: &str, surface: u32) {
        let index = match self.group_index.get(key) {
            Some(&index) => index,
            None => {
                self.groups.push(PhysicalGroup {
                    name: key.to_string(),
                    surfaces: Vec::new(),
                });
                let index = self.groups.len() - 1;
                self.group_index.insert(key.to_string(), index);
                index
            }
        };
        self.groups[index].surfaces.push(surface);
    }

    fn reject(&mut self, message: String) {
        let diagnostic = Diagnostic::degenerate(message);
        warn!(%diagnostic, "跳过退化面");
        self.diagnostics.push(diagnostic);
    }

    fn finish(self, volume_name: String) -> BoundaryDescription {
        let lines: Vec<(u32, u32)> = self.edges.into_iter().collect();
        let line_ids: HashMap<(u32, u32), i64> = lines
            .iter()
            .enumerate()
            .map(|(index, &edge)| (edge, index as i64 + 1))
            .collect();

        let loops = self
            .chains
            .iter()
            .map(|chain| {
                chain
                    .iter()
                    .map(|&(from, to)| {
                        let id = line_ids[&(from.min(to), from.max(to))];
                        if from > to { -id } else { id }
                    })
                    .collect()
            })
            .collect();

        BoundaryDescription {
            points: self.points,
            lines,
            loops,
            groups: self.groups,
            volume_name,
            diagnostics: self.diagnostics,
        }
    }
}

/// 把面的有向边拼接成一条链：能接在尾部就接尾部，否则尝试接在头部。
/// 链首尾不相接时补一条闭合边。有边接不上或闭合环不足 3 条边时返回 `None`。
fn stitch(edges: Vec<(u32, u32)>) -> Option<Vec<(u32, u32)>> {
    let mut pending = edges.into_iter();
    let first = pending.next()?;
    let mut chain = vec![first];
    let mut remaining: Vec<(u32, u32)> = pending.collect();

    while !remaining.is_empty() {
        let back = chain[chain.len() - 1].1;
        let front = chain[0].0;
        if back == front {
            return None;
        }
        if let Some(position) = remaining.iter().position(|edge| edge.0 == back) {
            chain.push(remaining.remove(position));
        } else if let Some(position) = remaining.iter().position(|edge| edge.1 == front) {
            chain.insert(0, remaining.remove(position));
        } else {
            return None;
        }
    }

    let tail = chain[chain.len() - 1].1;
    let head = chain[0].0;
    if tail != head {
        chain.push((tail, head));
    }
    (chain.len() >= 3).then_some(chain)
}
