pub mod geometry {
    use glam::{DMat3, DVec2, DVec3};
    use serde::{Deserialize, Serialize};

    /// bulge 绝对值低于该阈值时视为直线段。
    pub const BULGE_EPSILON: f64 = 1e-12;

    /// 弦长低于该阈值时视为退化线段。
    pub const CHORD_EPSILON: f64 = 1e-10;

    /// 绕 X 轴旋转 90°：将 CAD 的 Z 向上坐标系转换为网格器使用的 Y 向上坐标系。
    /// 按行展开为 `[[1, 0, 0], [0, 0, -1], [0, 1, 0]]`，即 `(x, y, z) → (x, -z, y)`。
    pub const Z_UP_TO_Y_UP: DMat3 = DMat3::from_cols(
        DVec3::new(1.0, 0.0, 0.0),
        DVec3::new(0.0, 0.0, 1.0),
        DVec3::new(0.0, -1.0, 0.0),
    );

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        /// 提升为三维点，Z 分量取给定的标高。
        #[inline]
        pub fn with_z(self, z: f64) -> Point3 {
            Point3::new(self.0.x, self.0.y, z)
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 三维点。所有下游阶段（拓扑提取、GEO 输出）只接受该类型。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        pub const ORIGIN: Point3 = Point3(DVec3::ZERO);

        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        /// 从 2 或 3 个分量的切片构造点，2D 输入的 Z 取 0。
        /// 其他长度无法识别，返回 `None`，由调用方决定回退策略。
        pub fn from_slice(coords: &[f64]) -> Option<Self> {
            match *coords {
                [x, y] => Some(Self::new(x, y, 0.0)),
                [x, y, z] => Some(Self::new(x, y, z)),
                _ => None,
            }
        }

        /// 应用固定的 Z 向上 → Y 向上旋转。
        #[inline]
        pub fn to_y_up(self) -> Self {
            Self(Z_UP_TO_Y_UP * self.0)
        }

        #[inline]
        pub fn distance(self, other: Point3) -> f64 {
            self.0.distance(other.0)
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    impl From<Point2> for Point3 {
        fn from(value: Point2) -> Self {
            value.with_z(0.0)
        }
    }

    impl From<(f64, f64)> for Point3 {
        fn from((x, y): (f64, f64)) -> Self {
            Self::new(x, y, 0.0)
        }
    }

    impl From<(f64, f64, f64)> for Point3 {
        fn from((x, y, z): (f64, f64, f64)) -> Self {
            Self::new(x, y, z)
        }
    }

    impl From<[f64; 2]> for Point3 {
        fn from([x, y]: [f64; 2]) -> Self {
            Self::new(x, y, 0.0)
        }
    }

    impl From<[f64; 3]> for Point3 {
        fn from([x, y, z]: [f64; 3]) -> Self {
            Self::new(x, y, z)
        }
    }

    /// 三维向量，用于圆的法向、块参照缩放等。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        pub const UNIT_Z: Vector3 = Vector3(DVec3::Z);
        pub const ONE: Vector3 = Vector3(DVec3::ONE);

        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn normalize(self) -> Option<Self> {
            let len = self.0.length();
            if len <= f64::EPSILON {
                None
            } else {
                Some(Self(self.0 / len))
            }
        }

        #[inline]
        pub fn to_y_up(self) -> Self {
            Self(Z_UP_TO_Y_UP * self.0)
        }
    }

    impl From<DVec3> for Vector3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 块参照变换：逐轴缩放 → 绕 Z 轴旋转 → 平移到插入点 → 全局坐标系旋转。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct InsertTransform {
        pub scale: Vector3,
        /// 绕 Z 轴旋转角（弧度）。
        pub rotation: f64,
        pub translation: Point3,
    }

    impl InsertTransform {
        pub fn apply(&self, point: Point3) -> Point3 {
            let scaled = point.0 * self.scale.0;
            let rotated = if self.rotation != 0.0 {
                DMat3::from_rotation_z(self.rotation) * scaled
            } else {
                scaled
            };
            Point3(rotated + self.translation.0).to_y_up()
        }
    }

    /// 由 bulge 描述的圆弧段，按三点（起点、弧中点、终点）定义。
    ///
    /// 弧中点位于弦中点沿左法向 `(-dy, dx) / d` 偏移矢高 `h = bulge · d / 2` 处，
    /// 正 bulge 向弦的左侧鼓出，负 bulge 向右侧鼓出。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct BulgeArc {
        pub start: Point2,
        pub mid: Point2,
        pub end: Point2,
        pub center: Point2,
        pub radius: f64,
        pub start_angle: f64,
        pub end_angle: f64,
    }

    impl BulgeArc {
        /// bulge 为 0 或弦长退化时返回 `None`。
        pub fn from_segment(start: Point2, end: Point2, bulge: f64) -> Option<Self> {
            if bulge.abs() <= BULGE_EPSILON {
                return None;
            }
            let chord = end.0 - start.0;
            let chord_len = chord.length();
            if chord_len <= CHORD_EPSILON {
                return None;
            }

            let normal = DVec2::new(-chord.y, chord.x) / chord_len;
            let sagitta = bulge * chord_len / 2.0;
            let midpoint = (start.0 + end.0) * 0.5;
            let arc_mid = midpoint + normal * sagitta;

            let half_chord = chord_len / 2.0;
            let radius = (half_chord * half_chord + sagitta * sagitta) / (2.0 * sagitta.abs());
            let center = arc_mid - normal * (sagitta.signum() * radius);

            let start_dir = start.0 - center;
            let end_dir = end.0 - center;
            Some(Self {
                start,
                mid: Point2(arc_mid),
                end,
                center: Point2(center),
                radius,
                start_angle: start_dir.y.atan2(start_dir.x),
                end_angle: end_dir.y.atan2(end_dir.x),
            })
        }
    }

    /// 三维轴对齐包围盒，用于导入后的尺寸日志。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds3D {
        min: Point3,
        max: Point3,
    }

    impl Bounds3D {
        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
                max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y() || self.min.z() > self.max.z()
        }

        #[inline]
        pub fn min(&self) -> Point3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point3 {
            self.max
        }

        pub fn include_point(&mut self, point: Point3) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point3(self.min.0.min(point.0));
            self.max = Point3(self.max.0.max(point.0));
        }

        /// 各轴跨度；空包围盒返回零向量。
        pub fn size(&self) -> Vector3 {
            if self.is_empty() {
                Vector3(DVec3::ZERO)
            } else {
                Vector3(self.max.0 - self.min.0)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn y_up_rotation_maps_z_to_y() {
            let rotated = Point3::new(1.0, 2.0, 3.0).to_y_up();
            assert!((rotated.x() - 1.0).abs() < 1e-12);
            assert!((rotated.y() + 3.0).abs() < 1e-12);
            assert!((rotated.z() - 2.0).abs() < 1e-12);
        }

        #[test]
        fn slice_points_accept_two_or_three_components() {
            assert_eq!(Point3::from_slice(&[1.0, 2.0]), Some(Point3::new(1.0, 2.0, 0.0)));
            assert_eq!(
                Point3::from_slice(&[1.0, 2.0, 3.0]),
                Some(Point3::new(1.0, 2.0, 3.0))
            );
            assert!(Point3::from_slice(&[1.0]).is_none());
            assert!(Point3::from_slice(&[1.0, 2.0, 3.0, 4.0]).is_none());
        }

        #[test]
        fn unit_bulge_is_upper_semicircle() {
            let arc = BulgeArc::from_segment(Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), 1.0)
                .expect("bulge 1.0 should yield an arc");
            assert!((arc.mid.x() - 1.0).abs() < 1e-6);
            assert!((arc.mid.y() - 1.0).abs() < 1e-6);
            assert!((arc.center.x() - 1.0).abs() < 1e-6);
            assert!(arc.center.y().abs() < 1e-6);
            assert!((arc.radius - 1.0).abs() < 1e-6);
        }

        #[test]
        fn shallow_bulge_keeps_all_three_points_on_circle() {
            let start = Point2::new(1.0, 1.0);
            let end = Point2::new(4.0, 5.0);
            for bulge in [0.25, -0.4, 2.0] {
                let arc = BulgeArc::from_segment(start, end, bulge).expect("arc");
                for point in [arc.start, arc.mid, arc.end] {
                    let dist = (point.as_vec2() - arc.center.as_vec2()).length();
                    assert!((dist - arc.radius).abs() < 1e-9, "bulge {bulge}");
                }
            }
        }

        #[test]
        fn zero_bulge_or_zero_chord_is_not_an_arc() {
            let p = Point2::new(3.0, 3.0);
            assert!(BulgeArc::from_segment(p, Point2::new(5.0, 3.0), 0.0).is_none());
            assert!(BulgeArc::from_segment(p, p, 0.5).is_none());
        }

        #[test]
        fn insert_transform_scales_rotates_then_translates() {
            let transform = InsertTransform {
                scale: Vector3::new(2.0, 2.0, 1.0),
                rotation: std::f64::consts::FRAC_PI_2,
                translation: Point3::new(10.0, 0.0, 0.0),
            };
            // (1,0,0) → 缩放 (2,0,0) → 旋转 (0,2,0) → 平移 (10,2,0) → Y 向上 (10,0,2)
            let result = transform.apply(Point3::new(1.0, 0.0, 0.0));
            assert!((result.x() - 10.0).abs() < 1e-9);
            assert!(result.y().abs() < 1e-9);
            assert!((result.z() - 2.0).abs() < 1e-9);
        }
    }
}

pub mod diagnostics {
    use std::fmt;

    use serde::{Deserialize, Serialize};

    /// 可恢复问题的分类。出现这些问题时转换继续，只记录警告。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum DiagnosticKind {
        /// 不支持的实体类型（或块内不支持的实体），已跳过。
        UnsupportedEntity,
        /// 面或边退化，已跳过。
        DegenerateTopology,
        /// 无法识别的坐标表示，已回退为原点。
        MalformedPoint,
        /// INSERT 引用了不存在的块。
        MissingBlock,
    }

    impl DiagnosticKind {
        pub fn describe(&self) -> &'static str {
            match self {
                DiagnosticKind::UnsupportedEntity => "UnsupportedEntity",
                DiagnosticKind::DegenerateTopology => "DegenerateTopology",
                DiagnosticKind::MalformedPoint => "MalformedPoint",
                DiagnosticKind::MissingBlock => "MissingBlock",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Diagnostic {
        pub kind: DiagnosticKind,
        pub message: String,
    }

    impl Diagnostic {
        pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
            Self {
                kind,
                message: message.into(),
            }
        }

        pub fn unsupported_entity(message: impl Into<String>) -> Self {
            Self::new(DiagnosticKind::UnsupportedEntity, message)
        }

        pub fn degenerate(message: impl Into<String>) -> Self {
            Self::new(DiagnosticKind::DegenerateTopology, message)
        }

        pub fn malformed_point(message: impl Into<String>) -> Self {
            Self::new(DiagnosticKind::MalformedPoint, message)
        }

        pub fn missing_block(message: impl Into<String>) -> Self {
            Self::new(DiagnosticKind::MissingBlock, message)
        }
    }

    impl fmt::Display for Diagnostic {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "[{}] {}", self.kind.describe(), self.message)
        }
    }
}

pub mod document {
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds3D, BulgeArc, Point2, Point3, Vector3};

    /// 未指定材质时使用的默认材质组名。
    pub const DEFAULT_MATERIAL: &str = "M_1";

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Layer {
        pub name: String,
    }

    /// 受支持实体的闭合集合；导入器只产生这些变体。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum Entity {
        Point(PointEntity),
        Line(LineSegment),
        Circle(Circle),
        Arc(Arc),
        Polyline(Polyline),
        Mesh(Mesh),
        BlockInstance(BlockInstance),
    }

    impl Entity {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Entity::Point(point) => &point.layer,
                Entity::Line(line) => &line.layer,
                Entity::Circle(circle) => &circle.layer,
                Entity::Arc(arc) => &arc.layer,
                Entity::Polyline(polyline) => &polyline.layer,
                Entity::Mesh(mesh) => &mesh.layer,
                Entity::BlockInstance(instance) => &instance.layer,
            }
        }

        pub fn kind(&self) -> &'static str {
            match self {
                Entity::Point(_) => "Point",
                Entity::Line(_) => "Line",
                Entity::Circle(_) => "Circle",
                Entity::Arc(_) => "Arc",
                Entity::Polyline(_) => "Polyline",
                Entity::Mesh(_) => "Mesh",
                Entity::BlockInstance(_) => "BlockInstance",
            }
        }

        /// 实体的三维范围；块参照只计入插入点。
        pub fn bounds(&self) -> Option<Bounds3D> {
            let mut bounds = Bounds3D::empty();
            match self {
                Entity::Point(point) => bounds.include_point(point.position),
                Entity::Line(line) => {
                    bounds.include_point(line.start);
                    bounds.include_point(line.end);
                }
                Entity::Circle(circle) => bounds.include_point(circle.center),
                Entity::Arc(arc) => {
                    bounds.include_point(arc.start);
                    bounds.include_point(arc.mid);
                    bounds.include_point(arc.end);
                }
                Entity::Polyline(polyline) => {
                    for vertex in &polyline.vertices {
                        bounds.include_point(vertex.position);
                    }
                }
                Entity::Mesh(mesh) => {
                    for vertex in &mesh.vertices {
                        bounds.include_point(*vertex);
                    }
                }
                Entity::BlockInstance(instance) => bounds.include_point(instance.insert),
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PointEntity {
        pub position: Point3,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LineSegment {
        pub start: Point3,
        pub end: Point3,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Circle {
        pub center: Point3,
        pub normal: Vector3,
        pub radius: f64,
        pub layer: String,
    }

    /// 三点圆弧：起点、弧上中间点、终点，附带圆心与半径。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Arc {
        pub start: Point3,
        pub mid: Point3,
        pub end: Point3,
        pub center: Point3,
        pub radius: f64,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PolylineVertex {
        pub position: Point3,
        /// 当前顶点到下一顶点线段的 bulge，0 表示直线段。
        pub bulge: f64,
    }

    impl PolylineVertex {
        #[inline]
        pub fn new(position: Point3) -> Self {
            Self {
                position,
                bulge: 0.0,
            }
        }

        #[inline]
        pub fn with_bulge(position: Point3, bulge: f64) -> Self {
            Self { position, bulge }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<PolylineVertex>,
        pub is_closed: bool,
        pub layer: String,
    }

    /// 多段线拆分后的单个线段。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum PolylineSegment {
        Straight { start: Point3, end: Point3 },
        Arc { arc: BulgeArc, elevation: f64 },
    }

    impl Polyline {
        #[inline]
        pub fn has_bulges(&self) -> bool {
            self.vertices.iter().any(|vertex| vertex.bulge != 0.0)
        }

        /// 按顶点顺序拆分线段（闭合时包含末点→首点）。bulge 在顶点所在的 XY 平面内解释，
        /// 圆弧标高取起点的 Z。弦长为 0 的线段被跳过。
        pub fn segments(&self) -> Vec<PolylineSegment> {
            let count = self.vertices.len();
            if count < 2 {
                return Vec::new();
            }
            let segment_count = if self.is_closed { count } else { count - 1 };
            let mut segments = Vec::with_capacity(segment_count);
            for index in 0..segment_count {
                let current = &self.vertices[index];
                let next = &self.vertices[(index + 1) % count];
                let start = current.position;
                let end = next.position;
                if start.distance(end) <= crate::geometry::CHORD_EPSILON {
                    continue;
                }
                let arc = BulgeArc::from_segment(
                    Point2::new(start.x(), start.y()),
                    Point2::new(end.x(), end.y()),
                    current.bulge,
                );
                match arc {
                    Some(arc) => segments.push(PolylineSegment::Arc {
                        arc,
                        elevation: start.z(),
                    }),
                    None => segments.push(PolylineSegment::Straight { start, end }),
                }
            }
            segments
        }
    }

    /// 网格面，只允许三角形或四边形。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum Face {
        Triangle([u32; 3]),
        Quad([u32; 4]),
    }

    impl Face {
        /// 由 3 或 4 个索引构造面，其他数量返回 `None`。
        pub fn from_indices(indices: &[u32]) -> Option<Self> {
            match *indices {
                [a, b, c] => Some(Face::Triangle([a, b, c])),
                [a, b, c, d] => Some(Face::Quad([a, b, c, d])),
                _ => None,
            }
        }

        #[inline]
        pub fn indices(&self) -> &[u32] {
            match self {
                Face::Triangle(indices) => indices,
                Face::Quad(indices) => indices,
            }
        }
    }

    /// 多边形网格。导入器构建后不再修改。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Mesh {
        pub vertices: Vec<Point3>,
        pub faces: Vec<Face>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub material: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub material_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub layer_index: Option<u32>,
        /// 稳定的对象标识，材质回写时作为物理组名使用。
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub object_id: Option<String>,
        pub layer: String,
    }

    impl Mesh {
        pub fn new(vertices: Vec<Point3>, faces: Vec<Face>, layer: impl Into<String>) -> Self {
            Self {
                vertices,
                faces,
                material: None,
                material_index: None,
                layer_index: None,
                object_id: None,
                layer: layer.into(),
            }
        }

        pub fn with_material(mut self, material: impl Into<String>) -> Self {
            self.material = Some(material.into());
            self
        }

        pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
            self.object_id = Some(object_id.into());
            self
        }

        /// 物理组材质键：显式材质名 → `M_<材质索引>` → `M_<图层索引>` → `M_1`。
        pub fn material_key(&self) -> String {
            if let Some(name) = self.material.as_deref().filter(|name| !name.is_empty()) {
                return name.to_string();
            }
            if let Some(index) = self.material_index {
                return format!("M_{index}");
            }
            if let Some(index) = self.layer_index {
                return format!("M_{index}");
            }
            DEFAULT_MATERIAL.to_string()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BlockInstance {
        pub block: String,
        pub insert: Point3,
        pub scale: Vector3,
        /// 绕 Z 轴旋转角（弧度）。
        pub rotation: f64,
        pub layer: String,
    }

    /// 块定义，仅作为实例化模板，不写入中间文档。
    #[derive(Debug, Clone, PartialEq)]
    pub struct Block {
        pub name: String,
        pub base_point: Point3,
        pub entities: Vec<Entity>,
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    pub struct Document {
        name: String,
        layers: Vec<Layer>,
        entities: Vec<(EntityId, Entity)>,
        next_entity_id: u64,
        #[serde(skip)]
        blocks: HashMap<String, Block>,
    }

    impl Document {
        pub fn new(name: impl Into<String>) -> Self {
            let mut doc = Self {
                name: name.into(),
                ..Self::default()
            };
            doc.ensure_layer("0");
            doc
        }

        #[inline]
        pub fn name(&self) -> &str {
            &self.name
        }

        /// 确保图层存在，返回其 1 起始的图层索引。
        pub fn ensure_layer(&mut self, name: impl AsRef<str>) -> u32 {
            let key = name.as_ref();
            if let Some(index) = self.layer_index(key) {
                return index;
            }
            self.layers.push(Layer {
                name: key.to_string(),
            });
            self.layers.len() as u32
        }

        /// 图层按首次出现顺序编号，从 1 开始。
        pub fn layer_index(&self, name: &str) -> Option<u32> {
            self.layers
                .iter()
                .position(|layer| layer.name == name)
                .map(|position| position as u32 + 1)
        }

        pub fn add_point(&mut self, position: Point3, layer: impl Into<String>) -> EntityId {
            let layer = layer.into();
            self.push(Entity::Point(PointEntity { position, layer }))
        }

        pub fn add_line(
            &mut self,
            start: Point3,
            end: Point3,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::Line(LineSegment { start, end, layer }))
        }

        pub fn add_circle(
            &mut self,
            center: Point3,
            normal: Vector3,
            radius: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            let layer = layer.into();
            self.push(Entity::Circle(Circle {
                center,
                normal,
                radius,
                layer,
            }))
        }

        /// 加入网格；若未设置图层索引则按文档图层表补齐。
        pub fn add_mesh(&mut self, mut mesh: Mesh) -> EntityId {
            if mesh.layer_index.is_none() {
                mesh.layer_index = Some(self.ensure_layer(&mesh.layer));
            }
            self.push(Entity::Mesh(mesh))
        }

        pub fn add_entity(&mut self, entity: Entity) -> EntityId {
            match entity {
                Entity::Mesh(mesh) => self.add_mesh(mesh),
                other => self.push(other),
            }
        }

        #[inline]
        pub fn layers(&self) -> impl Iterator<Item = &Layer> {
            self.layers.iter()
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
            self.entities.iter()
        }

        #[inline]
        pub fn entity_count(&self) -> usize {
            self.entities.len()
        }

        /// 按加入顺序遍历网格实体。
        pub fn meshes(&self) -> impl Iterator<Item = (EntityId, &Mesh)> {
            self.entities.iter().filter_map(|(id, entity)| match entity {
                Entity::Mesh(mesh) => Some((*id, mesh)),
                _ => None,
            })
        }

        pub fn add_block(&mut self, block: Block) {
            for entity in &block.entities {
                self.ensure_layer(entity.layer_name());
            }
            self.blocks.insert(block.name.clone(), block);
        }

        #[inline]
        pub fn block(&self, name: &str) -> Option<&Block> {
            self.blocks.get(name)
        }

        pub fn bounds(&self) -> Option<Bounds3D> {
            let mut bounds = Bounds3D::empty();
            for (_, entity) in &self.entities {
                if let Some(entity_bounds) = entity.bounds() {
                    bounds.include_point(entity_bounds.min());
                    bounds.include_point(entity_bounds.max());
                }
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        fn push(&mut self, entity: Entity) -> EntityId {
            self.ensure_layer(entity.layer_name());
            let id = EntityId(self.next_entity_id);
            self.next_entity_id += 1;
            self.entities.push((id, entity));
            id
        }
    }

}
