use std::path::Path;

use choras_core::diagnostics::Diagnostic;
use choras_core::document::{
    Arc, Block, BlockInstance, Circle, Document, Entity, Face, LineSegment, Mesh, PointEntity,
    Polyline, PolylineSegment, PolylineVertex,
};
use choras_core::geometry::{InsertTransform, Point3, Vector3};
use tracing::{debug, warn};

use crate::{DocumentLoader, ImportReport, IoError, polygon_faces, read_source};

/// 每批写入文档的实体数量上限。
pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub struct DxfFacade {
    batch_size: usize,
}

impl DxfFacade {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl Default for DxfFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<ImportReport, IoError> {
        let data = read_source(path)?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("dxf");
        import_dxf(&data, name, self.batch_size).map_err(|err| IoError::CorruptSource {
            path: path.to_path_buf(),
            message: err.into_message(),
        })
    }
}

/// 两遍导入：先收集全部块定义，再解析 ENTITIES 段并展开块参照。
fn import_dxf(source: &str, name: &str, batch_size: usize) -> Result<ImportReport, DxfError> {
    let mut document = Document::new(name);

    let mut block_pass = DxfParser::new(source);
    let blocks = block_pass.collect_blocks()?;
    let mut diagnostics = block_pass.diagnostics;
    debug!(blocks = blocks.len(), "DXF 块定义收集完成");
    for block in blocks {
        document.add_block(block);
    }

    let mut parser = DxfParser::new(source);
    let mut sink = EntitySink::new(&mut document, batch_size);
    parser.collect_entities(&mut sink)?;
    let sink_diagnostics = sink.finish();
    diagnostics.extend(parser.diagnostics);
    diagnostics.extend(sink_diagnostics);

    Ok(ImportReport {
        document,
        diagnostics,
    })
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    fn into_message(self) -> String {
        match self {
            DxfError::Unsupported { feature } => feature,
            DxfError::Invalid { message } => message,
        }
    }
}

/// 按批缓冲已解析的实体（CAD 坐标），满批后旋转到 Y 向上并写入文档。
struct EntitySink<'d> {
    document: &'d mut Document,
    pending: Vec<Entity>,
    batch_size: usize,
    batches: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'d> EntitySink<'d> {
    fn new(document: &'d mut Document, batch_size: usize) -> Self {
        Self {
            document,
            pending: Vec::with_capacity(batch_size),
            batch_size,
            batches: 0,
            diagnostics: Vec::new(),
        }
    }

    fn push(&mut self, entity: Entity) {
        self.pending.push(entity);
        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch: Vec<Entity> = self.pending.drain(..).collect();
        let size = batch.len();
        for entity in batch {
            self.emit(entity);
        }
        self.batches += 1;
        debug!(batch = self.batches, size, "DXF 实体批次已写入文档");
    }

    fn finish(mut self) -> Vec<Diagnostic> {
        self.flush();
        self.diagnostics
    }

    fn emit(&mut self, entity: Entity) {
        match entity {
            Entity::Polyline(polyline) if polyline.has_bulges() => {
                self.emit_bulged_polyline(polyline)
            }
            Entity::BlockInstance(instance) => self.expand_insert(instance),
            other => {
                self.document.add_entity(into_y_up(other));
            }
        }
    }

    /// bulge 线段在 CAD 平面内展开为三点圆弧，直线段保持为线段。
    fn emit_bulged_polyline(&mut self, polyline: Polyline) {
        for segment in polyline.segments() {
            let entity = match segment {
                PolylineSegment::Straight { start, end } => Entity::Line(LineSegment {
                    start,
                    end,
                    layer: polyline.layer.clone(),
                }),
                PolylineSegment::Arc { arc, elevation } => Entity::Arc(Arc {
                    start: arc.start.with_z(elevation),
                    mid: arc.mid.with_z(elevation),
                    end: arc.end.with_z(elevation),
                    center: arc.center.with_z(elevation),
                    radius: arc.radius,
                    layer: polyline.layer.clone(),
                }),
            };
            self.document.add_entity(into_y_up(entity));
        }
    }

    fn expand_insert(&mut self, mut instance: BlockInstance) {
        let Some(block) = self.document.block(&instance.block) else {
            self.record(Diagnostic::missing_block(format!(
                "INSERT 引用了不存在的块 {}，已跳过",
                instance.block
            )));
            return;
        };

        let transform = InsertTransform {
            scale: instance.scale,
            rotation: instance.rotation,
            translation: instance.insert,
        };
        let base = block.base_point.as_vec3();
        let place = |point: Point3| transform.apply(Point3(point.as_vec3() - base));

        let mut expanded = Vec::with_capacity(block.entities.len());
        let mut skipped = Vec::new();
        for entity in &block.entities {
            match entity {
                Entity::Line(line) => expanded.push(Entity::Line(LineSegment {
                    start: place(line.start),
                    end: place(line.end),
                    layer: line.layer.clone(),
                })),
                Entity::Mesh(mesh) => {
                    let vertices = mesh.vertices.iter().map(|vertex| place(*vertex)).collect();
                    let placed = Mesh::new(vertices, mesh.faces.clone(), mesh.layer.clone())
                        .with_material(mesh.layer.clone());
                    expanded.push(Entity::Mesh(placed));
                }
                other => skipped.push(other.kind()),
            }
        }

        for kind in skipped {
            self.record(Diagnostic::unsupported_entity(format!(
                "块 {} 中的 {kind} 实体不支持实例化，已跳过",
                instance.block
            )));
        }
        for entity in expanded {
            self.document.add_entity(entity);
        }
        instance.insert = instance.insert.to_y_up();
        self.document.add_entity(Entity::BlockInstance(instance));
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        warn!(kind = diagnostic.kind.describe(), "{}", diagnostic.message);
        self.diagnostics.push(diagnostic);
    }
}

/// 将 CAD（Z 向上）坐标下的实体整体旋转到 Y 向上坐标系。
fn into_y_up(mut entity: Entity) -> Entity {
    match &mut entity {
        Entity::Point(point) => point.position = point.position.to_y_up(),
        Entity::Line(line) => {
            line.start = line.start.to_y_up();
            line.end = line.end.to_y_up();
        }
        Entity::Circle(circle) => {
            circle.center = circle.center.to_y_up();
            circle.normal = circle.normal.to_y_up();
        }
        Entity::Arc(arc) => {
            arc.start = arc.start.to_y_up();
            arc.mid = arc.mid.to_y_up();
            arc.end = arc.end.to_y_up();
            arc.center = arc.center.to_y_up();
        }
        Entity::Polyline(polyline) => {
            for vertex in &mut polyline.vertices {
                vertex.position = vertex.position.to_y_up();
            }
        }
        Entity::Mesh(mesh) => {
            for vertex in &mut mesh.vertices {
                *vertex = vertex.to_y_up();
            }
        }
        Entity::BlockInstance(instance) => instance.insert = instance.insert.to_y_up(),
    }
    entity
}

/// 按组码收集的坐标分量。
#[derive(Debug, Default, Clone, Copy)]
struct CoordSlot {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
}

impl CoordSlot {
    fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }

    /// 从 X 开始连续存在的分量；缺少 X 或 Y 时长度不足，交由 `Point3::from_slice` 判定。
    fn components(&self) -> Vec<f64> {
        [self.x, self.y, self.z].into_iter().map_while(|c| c).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeshStage {
    Header,
    Vertices,
    Faces,
    Trailer,
}

enum PolyfaceRecord {
    Coordinate(Point3),
    Face { indices: [i32; 4] },
    Ignored,
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
            diagnostics: Vec::new(),
        }
    }

    /// 第一遍：只解析 BLOCKS 段。
    fn collect_blocks(&mut self) -> Result<Vec<Block>, DxfError> {
        let mut blocks = Vec::new();
        while let Some(section) = self.next_section()? {
            match section.as_str() {
                "BLOCKS" => self.parse_blocks(&mut blocks)?,
                _ => self.skip_section()?,
            }
        }
        Ok(blocks)
    }

    /// 第二遍：只解析 ENTITIES 段。
    fn collect_entities(&mut self, sink: &mut EntitySink<'_>) -> Result<(), DxfError> {
        while let Some(section) = self.next_section()? {
            match section.as_str() {
                "ENTITIES" => self.parse_entities(sink)?,
                _ => self.skip_section()?,
            }
        }
        Ok(())
    }

    fn next_section(&mut self) -> Result<Option<String>, DxfError> {
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "第 {} 行出现意外的组码 {code}（期望 0 表示 SECTION/EOF）",
                    self.reader.line_number
                )));
            }
            match value.trim() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    return Ok(Some(name.trim().to_string()));
                }
                "EOF" => return Ok(None),
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(None)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value.trim() == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_entities(&mut self, sink: &mut EntitySink<'_>) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.trim() {
                "ENDSEC" => break,
                "SEQEND" => {
                    self.skip_entity_body()?;
                }
                kind => match self.parse_entity(kind) {
                    Ok(Some(entity)) => sink.push(entity),
                    Ok(None) => {}
                    Err(DxfError::Unsupported { feature }) => {
                        self.skip_entity_body()?;
                        self.record(Diagnostic::unsupported_entity(feature));
                    }
                    Err(err) => return Err(err),
                },
            }
        }
        Ok(())
    }

    fn parse_blocks(&mut self, blocks: &mut Vec<Block>) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("BLOCKS 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "BLOCKS 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.trim() {
                "ENDSEC" => break,
                "BLOCK" => {
                    if let Some(block) = self.parse_block_definition()? {
                        blocks.push(block);
                    }
                }
                _ => {
                    self.skip_entity_body()?;
                }
            }
        }
        Ok(())
    }

    /// 块内只保留 LINE 与 3DFACE；名称以 `*` 开头的伪块整体跳过。
    fn parse_block_definition(&mut self) -> Result<Option<Block>, DxfError> {
        let mut name: Option<String> = None;
        let mut base = CoordSlot::default();
        let mut collect_entities = true;
        let mut entities: Vec<Entity> = Vec::new();

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "ENDBLK" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ if !collect_entities => self.skip_entity_body()?,
                    "LINE" => entities.push(self.parse_line()?),
                    "3DFACE" => entities.push(self.parse_3dface()?),
                    "VERTEX" | "SEQEND" | "ATTRIB" => self.skip_entity_body()?,
                    other => {
                        let block_name = name.clone().unwrap_or_default();
                        self.skip_entity_body()?;
                        let message = if other == "INSERT" {
                            format!("块 {block_name} 中的嵌套 INSERT 不受支持，已跳过")
                        } else {
                            format!("块 {block_name} 中的 {other} 实体不支持实例化，已跳过")
                        };
                        self.record(Diagnostic::unsupported_entity(message));
                    }
                },
                Some((code, value)) => match code {
                    2 => {
                        let trimmed = value.trim().to_string();
                        collect_entities = !trimmed.starts_with('*');
                        name = Some(trimmed);
                    }
                    10 => base.x = Some(parse_f64(&value, "BLOCK 基点 X")?),
                    20 => base.y = Some(parse_f64(&value, "BLOCK 基点 Y")?),
                    30 => base.z = Some(parse_f64(&value, "BLOCK 基点 Z")?),
                    _ => {}
                },
                None => {
                    return Err(DxfError::invalid("BLOCK 定义未找到 ENDBLK 终止标记"));
                }
            }
        }

        let name = match name {
            Some(name) => name,
            None => return Err(DxfError::invalid("BLOCK 缺少名称（组码 2）")),
        };

        if !collect_entities {
            return Ok(None);
        }

        let base_point = if base.is_empty() {
            Point3::ORIGIN
        } else {
            self.resolve_point(&base, "BLOCK 基点")
        };
        Ok(Some(Block {
            name,
            base_point,
            entities,
        }))
    }

    /// 返回 `Ok(None)` 表示实体已读完但因退化被跳过（诊断已记录）。
    fn parse_entity(&mut self, kind: &str) -> Result<Option<Entity>, DxfError> {
        match kind {
            "POINT" => self.parse_point().map(Some),
            "LINE" => self.parse_line().map(Some),
            "CIRCLE" => self.parse_circle(),
            "ARC" => self.parse_arc(),
            "ELLIPSE" => self.parse_ellipse(),
            "LWPOLYLINE" => self.parse_lwpolyline(),
            "POLYLINE" => self.parse_polyline_entity(),
            "SPLINE" => self.parse_spline(),
            "3DFACE" => self.parse_3dface().map(Some),
            "MESH" => self.parse_mesh(),
            "INSERT" => self.parse_insert().map(Some),
            other => Err(DxfError::unsupported(format!(
                "暂不支持的实体类型 {other}，已跳过"
            ))),
        }
    }

    fn parse_point(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut position = CoordSlot::default();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut position.x, &value, "POINT X（组码 10）")?,
                    20 => assign_coord(&mut position.y, &value, "POINT Y（组码 20）")?,
                    30 => assign_coord(&mut position.z, &value, "POINT Z（组码 30）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("POINT 未正确结束")),
            }
        }

        let position = self.resolve_point(&position, "POINT");
        Ok(Entity::Point(PointEntity {
            position,
            layer: layer_or_default(layer),
        }))
    }

    fn parse_line(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut start = CoordSlot::default();
        let mut end = CoordSlot::default();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut start.x, &value, "LINE 起点 X（组码 10）")?,
                    20 => assign_coord(&mut start.y, &value, "LINE 起点 Y（组码 20）")?,
                    30 => assign_coord(&mut start.z, &value, "LINE 起点 Z（组码 30）")?,
                    11 => assign_coord(&mut end.x, &value, "LINE 终点 X（组码 11）")?,
                    21 => assign_coord(&mut end.y, &value, "LINE 终点 Y（组码 21）")?,
                    31 => assign_coord(&mut end.z, &value, "LINE 终点 Z（组码 31）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("LINE 未正确结束")),
            }
        }

        let start = self.resolve_point(&start, "LINE 起点");
        let end = self.resolve_point(&end, "LINE 终点");
        Ok(Entity::Line(LineSegment {
            start,
            end,
            layer: layer_or_default(layer),
        }))
    }

    fn parse_circle(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut center = CoordSlot::default();
        let mut normal = CoordSlot::default();
        let mut radius = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut center.x, &value, "CIRCLE 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center.y, &value, "CIRCLE 圆心 Y（组码 20）")?,
                    30 => assign_coord(&mut center.z, &value, "CIRCLE 圆心 Z（组码 30）")?,
                    40 => {
                        if radius.is_some() {
                            return Err(DxfError::invalid("CIRCLE 遇到重复的半径（组码 40）"));
                        }
                        radius = Some(parse_f64(&value, "CIRCLE 半径")?);
                    }
                    210 => normal.x = Some(parse_f64(&value, "CIRCLE 法向 X（组码 210）")?),
                    220 => normal.y = Some(parse_f64(&value, "CIRCLE 法向 Y（组码 220）")?),
                    230 => normal.z = Some(parse_f64(&value, "CIRCLE 法向 Z（组码 230）")?),
                    _ => {}
                },
                None => return Err(DxfError::invalid("CIRCLE 未正确结束")),
            }
        }

        let layer = layer_or_default(layer);
        let radius = radius.ok_or_else(|| DxfError::invalid("CIRCLE 缺少半径（组码 40）"))?;
        if radius <= 0.0 {
            self.record(Diagnostic::degenerate(format!(
                "CIRCLE 半径必须为正数，实际为 {radius}，已跳过"
            )));
            return Ok(None);
        }
        let center = self.resolve_point(&center, "CIRCLE 圆心");
        Ok(Some(Entity::Circle(Circle {
            center,
            normal: extrusion_direction(&normal),
            radius,
            layer,
        })))
    }

    /// 圆弧按起始角、终止角及其平分角采样为三点；终止角小于起始角时加一整周。
    fn parse_arc(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut center = CoordSlot::default();
        let mut radius = None;
        let mut start_angle = None;
        let mut end_angle = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut center.x, &value, "ARC 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center.y, &value, "ARC 圆心 Y（组码 20）")?,
                    30 => assign_coord(&mut center.z, &value, "ARC 圆心 Z（组码 30）")?,
                    40 => {
                        if radius.is_some() {
                            return Err(DxfError::invalid("ARC 遇到重复的半径（组码 40）"));
                        }
                        radius = Some(parse_f64(&value, "ARC 半径")?);
                    }
                    50 => {
                        if start_angle.is_some() {
                            return Err(DxfError::invalid("ARC 遇到重复的起始角（组码 50）"));
                        }
                        start_angle = Some(parse_f64(&value, "ARC 起始角")?.to_radians());
                    }
                    51 => {
                        if end_angle.is_some() {
                            return Err(DxfError::invalid("ARC 遇到重复的终止角（组码 51）"));
                        }
                        end_angle = Some(parse_f64(&value, "ARC 终止角")?.to_radians());
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("ARC 未正确结束")),
            }
        }

        let layer = layer_or_default(layer);
        let radius = radius.ok_or_else(|| DxfError::invalid("ARC 缺少半径（组码 40）"))?;
        let start_angle =
            start_angle.ok_or_else(|| DxfError::invalid("ARC 缺少起始角（组码 50）"))?;
        let mut end_angle =
            end_angle.ok_or_else(|| DxfError::invalid("ARC 缺少终止角（组码 51）"))?;
        if radius <= 0.0 {
            self.record(Diagnostic::degenerate(format!(
                "ARC 半径必须为正数，实际为 {radius}，已跳过"
            )));
            return Ok(None);
        }

        if end_angle < start_angle {
            end_angle += std::f64::consts::TAU;
        }
        let mid_angle = (start_angle + end_angle) / 2.0;
        let center = self.resolve_point(&center, "ARC 圆心");
        let on_circle = |angle: f64| {
            Point3::new(
                center.x() + radius * angle.cos(),
                center.y() + radius * angle.sin(),
                center.z(),
            )
        };

        Ok(Some(Entity::Arc(Arc {
            start: on_circle(start_angle),
            mid: on_circle(mid_angle),
            end: on_circle(end_angle),
            center,
            radius,
            layer,
        })))
    }

    /// 椭圆近似为以主轴长度为半径的圆。
    fn parse_ellipse(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut center = CoordSlot::default();
        let mut major = CoordSlot::default();
        let mut normal = CoordSlot::default();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut center.x, &value, "ELLIPSE 圆心 X（组码 10）")?,
                    20 => assign_coord(&mut center.y, &value, "ELLIPSE 圆心 Y（组码 20）")?,
                    30 => assign_coord(&mut center.z, &value, "ELLIPSE 圆心 Z（组码 30）")?,
                    11 => assign_coord(&mut major.x, &value, "ELLIPSE 主轴向量 X（组码 11）")?,
                    21 => assign_coord(&mut major.y, &value, "ELLIPSE 主轴向量 Y（组码 21）")?,
                    31 => assign_coord(&mut major.z, &value, "ELLIPSE 主轴向量 Z（组码 31）")?,
                    210 => normal.x = Some(parse_f64(&value, "ELLIPSE 法向 X（组码 210）")?),
                    220 => normal.y = Some(parse_f64(&value, "ELLIPSE 法向 Y（组码 220）")?),
                    230 => normal.z = Some(parse_f64(&value, "ELLIPSE 法向 Z（组码 230）")?),
                    40 | 41 | 42 => {
                        // 半径比与起止参数在圆近似下不使用
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("ELLIPSE 未正确结束")),
            }
        }

        let layer = layer_or_default(layer);
        let major_x = major
            .x
            .ok_or_else(|| DxfError::invalid("ELLIPSE 缺少主轴向量 X（组码 11）"))?;
        let major_y = major
            .y
            .ok_or_else(|| DxfError::invalid("ELLIPSE 缺少主轴向量 Y（组码 21）"))?;
        let radius = Vector3::new(major_x, major_y, major.z.unwrap_or(0.0))
            .as_vec3()
            .length();
        if radius <= f64::EPSILON {
            self.record(Diagnostic::degenerate(
                "ELLIPSE 主轴向量长度为 0，已跳过",
            ));
            return Ok(None);
        }

        let center = self.resolve_point(&center, "ELLIPSE 圆心");
        Ok(Some(Entity::Circle(Circle {
            center,
            normal: extrusion_direction(&normal),
            radius,
            layer,
        })))
    }

    fn parse_lwpolyline(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut is_closed = false;
        let mut elevation = 0.0;
        let mut pending = CoordSlot::default();
        let mut pending_bulge = 0.0;
        let mut points: Vec<(CoordSlot, f64)> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => {
                        let flag = parse_i32(&value, "LWPOLYLINE 标志")?;
                        is_closed = flag & 0x01 == 0x01;
                    }
                    38 => elevation = parse_f64(&value, "LWPOLYLINE 标高（组码 38）")?,
                    10 => {
                        if !pending.is_empty() {
                            points.push((pending, pending_bulge));
                        }
                        pending = CoordSlot::default();
                        pending_bulge = 0.0;
                        pending.x = Some(parse_f64(&value, "LWPOLYLINE 顶点 X")?);
                    }
                    20 => assign_coord(&mut pending.y, &value, "LWPOLYLINE 顶点 Y（组码 20）")?,
                    42 => pending_bulge = parse_f64(&value, "LWPOLYLINE 顶点 bulge")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("LWPOLYLINE 未正确结束")),
            }
        }
        if !pending.is_empty() {
            points.push((pending, pending_bulge));
        }

        let mut vertices = Vec::with_capacity(points.len());
        for (slot, bulge) in points {
            let slot = CoordSlot {
                z: Some(elevation),
                ..slot
            };
            let position = self.resolve_point(&slot, "LWPOLYLINE 顶点");
            vertices.push(PolylineVertex::with_bulge(position, bulge));
        }

        if vertices.len() < 2 {
            self.record(Diagnostic::degenerate(format!(
                "LWPOLYLINE 只有 {} 个顶点，已跳过",
                vertices.len()
            )));
            return Ok(None);
        }

        Ok(Some(Entity::Polyline(Polyline {
            vertices,
            is_closed,
            layer: layer_or_default(layer),
        })))
    }

    fn parse_polyline_entity(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut flags: Option<i16> = None;
        let mut mesh_rows: Option<i16> = None;
        let mut mesh_cols: Option<i16> = None;
        let mut elevation = 0.0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    30 => elevation = parse_f64(&value, "POLYLINE 标高（组码 30）")?,
                    70 => flags = Some(parse_i16(&value, "POLYLINE 标志（组码 70）")?),
                    71 => mesh_rows = Some(parse_i16(&value, "POLYLINE 网格行数（组码 71）")?),
                    72 => mesh_cols = Some(parse_i16(&value, "POLYLINE 网格列数（组码 72）")?),
                    _ => {}
                },
                None => return Err(DxfError::invalid("POLYLINE 未正确结束")),
            }
        }

        let flags = flags.unwrap_or(0);
        let layer = layer_or_default(layer);
        if flags & 0x40 != 0 {
            return self.parse_polyface_mesh(layer);
        }

        if flags & 0x10 != 0 {
            let rows =
                mesh_rows.ok_or_else(|| DxfError::invalid("POLYLINE Mesh 缺少行数（组码 71）"))?;
            let cols =
                mesh_cols.ok_or_else(|| DxfError::invalid("POLYLINE Mesh 缺少列数（组码 72）"))?;
            let wrap_m = flags & 0x01 != 0;
            let wrap_n = flags & 0x02 != 0;
            return self.parse_polygon_mesh(
                layer,
                rows.max(0) as usize,
                cols.max(0) as usize,
                wrap_m,
                wrap_n,
            );
        }

        self.parse_polyline_vertices(layer, flags & 0x01 != 0, elevation)
    }

    fn parse_polyline_vertices(
        &mut self,
        layer: String,
        is_closed: bool,
        elevation: f64,
    ) -> Result<Option<Entity>, DxfError> {
        let mut vertices: Vec<PolylineVertex> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => {
                        if let Some(vertex) = self.parse_polyline_vertex_record(elevation)? {
                            vertices.push(vertex);
                        }
                    }
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => {
                    return Err(DxfError::invalid(
                        "POLYLINE 遇到无效的记录，期望 VERTEX/SEQEND",
                    ));
                }
                None => {
                    return Err(DxfError::invalid(
                        "POLYLINE 缺少 SEQEND（组码 0, 值为 SEQEND）",
                    ));
                }
            }
        }

        if vertices.len() < 2 {
            self.record(Diagnostic::degenerate(format!(
                "POLYLINE 只有 {} 个顶点，已跳过",
                vertices.len()
            )));
            return Ok(None);
        }

        Ok(Some(Entity::Polyline(Polyline {
            vertices,
            is_closed,
            layer,
        })))
    }

    fn parse_polyline_vertex_record(
        &mut self,
        elevation: f64,
    ) -> Result<Option<PolylineVertex>, DxfError> {
        let mut position = CoordSlot::default();
        let mut bulge = 0.0;
        let mut flags: i16 = 0;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => position.x = Some(parse_f64(&value, "VERTEX X（组码 10）")?),
                    20 => position.y = Some(parse_f64(&value, "VERTEX Y（组码 20）")?),
                    30 => position.z = Some(parse_f64(&value, "VERTEX Z（组码 30）")?),
                    42 => bulge = parse_f64(&value, "VERTEX bulge（组码 42）")?,
                    70 => flags = parse_i16(&value, "VERTEX 标志（组码 70）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("VERTEX 未正确结束")),
            }
        }

        // 样条控制点（0x10）不属于可见折线
        if flags & 0x10 != 0 {
            return Ok(None);
        }
        if position.z.is_none() {
            position.z = Some(elevation);
        }
        let position = self.resolve_point(&position, "POLYLINE 顶点");
        Ok(Some(PolylineVertex::with_bulge(position, bulge)))
    }

    fn parse_polyface_mesh(&mut self, layer: String) -> Result<Option<Entity>, DxfError> {
        let mut coordinates: Vec<Point3> = Vec::new();
        let mut face_records: Vec<[i32; 4]> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => match self.parse_polyface_vertex_record()? {
                        PolyfaceRecord::Coordinate(point) => coordinates.push(point),
                        PolyfaceRecord::Face { indices } => face_records.push(indices),
                        PolyfaceRecord::Ignored => {}
                    },
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => {
                    return Err(DxfError::invalid(
                        "POLYLINE 遇到无效的记录，期望 VERTEX/SEQEND",
                    ));
                }
                None => {
                    return Err(DxfError::invalid(
                        "POLYLINE 缺少 SEQEND（组码 0, 值为 SEQEND）",
                    ));
                }
            }
        }

        let mut faces = Vec::with_capacity(face_records.len());
        for indices in face_records {
            // 负索引表示该边不可见，0 表示未使用的槽位
            let resolved: Vec<u32> = indices
                .iter()
                .filter(|&&index| index != 0)
                .map(|index| index.unsigned_abs())
                .collect();
            if let Some(&bad) = resolved
                .iter()
                .find(|&&index| index as usize > coordinates.len())
            {
                self.record(Diagnostic::degenerate(format!(
                    "POLYFACE 面引用了不存在的顶点索引 {bad}，已跳过"
                )));
                continue;
            }
            let zero_based: Vec<u32> = resolved.iter().map(|index| index - 1).collect();
            match Face::from_indices(&zero_based) {
                Some(face) => faces.push(face),
                None => self.record(Diagnostic::degenerate(format!(
                    "POLYFACE 面只有 {} 个顶点，已跳过",
                    zero_based.len()
                ))),
            }
        }

        self.finish_mesh("POLYFACE", coordinates, faces, layer)
    }

    fn parse_polygon_mesh(
        &mut self,
        layer: String,
        rows: usize,
        cols: usize,
        wrap_m: bool,
        wrap_n: bool,
    ) -> Result<Option<Entity>, DxfError> {
        let mut vertices: Vec<Point3> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "VERTEX" => {
                        if let Some(point) = self.parse_mesh_vertex_record()? {
                            vertices.push(point);
                        }
                    }
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some(_) => return Err(DxfError::invalid("POLYLINE 网格遇到无效记录")),
                None => {
                    return Err(DxfError::invalid(
                        "POLYLINE 网格缺少 SEQEND（组码 0, 值为 SEQEND）",
                    ));
                }
            }
        }

        let expected = rows * cols;
        if rows < 2 || cols < 2 || vertices.len() < expected {
            self.record(Diagnostic::degenerate(format!(
                "POLYLINE 网格 {rows}x{cols} 需要 {expected} 个顶点，实际为 {}，已跳过",
                vertices.len()
            )));
            return Ok(None);
        }

        let row_iterations = if wrap_m { rows } else { rows - 1 };
        let col_iterations = if wrap_n { cols } else { cols - 1 };
        let mut faces = Vec::with_capacity(row_iterations * col_iterations);
        for row in 0..row_iterations {
            let next_row = (row + 1) % rows;
            for col in 0..col_iterations {
                let next_col = (col + 1) % cols;
                let idx = (row * cols + col) as u32;
                let idx_right = (row * cols + next_col) as u32;
                let idx_down = (next_row * cols + col) as u32;
                let idx_diag = (next_row * cols + next_col) as u32;
                faces.push(Face::Quad([idx, idx_down, idx_diag, idx_right]));
            }
        }
        vertices.truncate(expected);

        self.finish_mesh("POLYLINE 网格", vertices, faces, layer)
    }

    fn parse_polyface_vertex_record(&mut self) -> Result<PolyfaceRecord, DxfError> {
        let mut position = CoordSlot::default();
        let mut flags: i16 = 0;
        let mut indices = [0i32; 4];

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => position.x = Some(parse_f64(&value, "POLYFACE 顶点 X（组码 10）")?),
                    20 => position.y = Some(parse_f64(&value, "POLYFACE 顶点 Y（组码 20）")?),
                    30 => position.z = Some(parse_f64(&value, "POLYFACE 顶点 Z（组码 30）")?),
                    70 => flags = parse_i16(&value, "VERTEX 标志（组码 70）")?,
                    71 => indices[0] = parse_i32(&value, "POLYFACE 面顶点 1（组码 71）")?,
                    72 => indices[1] = parse_i32(&value, "POLYFACE 面顶点 2（组码 72）")?,
                    73 => indices[2] = parse_i32(&value, "POLYFACE 面顶点 3（组码 73）")?,
                    74 => indices[3] = parse_i32(&value, "POLYFACE 面顶点 4（组码 74）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("VERTEX 未正确结束")),
            }
        }

        if flags & 0x80 != 0 && flags & 0x40 != 0 {
            let point = self.resolve_point(&position, "POLYFACE 顶点");
            Ok(PolyfaceRecord::Coordinate(point))
        } else if flags & 0x80 != 0 {
            Ok(PolyfaceRecord::Face { indices })
        } else {
            Ok(PolyfaceRecord::Ignored)
        }
    }

    fn parse_mesh_vertex_record(&mut self) -> Result<Option<Point3>, DxfError> {
        let mut position = CoordSlot::default();
        let mut flags: i16 = 0;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    10 => position.x = Some(parse_f64(&value, "POLYLINE 网格顶点 X（组码 10）")?),
                    20 => position.y = Some(parse_f64(&value, "POLYLINE 网格顶点 Y（组码 20）")?),
                    30 => position.z = Some(parse_f64(&value, "POLYLINE 网格顶点 Z（组码 30）")?),
                    70 => flags = parse_i16(&value, "VERTEX 标志（组码 70）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("VERTEX 未正确结束")),
            }
        }

        if flags & 0x80 != 0 {
            return Ok(None);
        }
        Ok(Some(self.resolve_point(&position, "POLYLINE 网格顶点")))
    }

    /// 样条近似为经过控制点的折线。
    fn parse_spline(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut flags: i16 = 0;
        let mut pending = CoordSlot::default();
        let mut slots: Vec<CoordSlot> = Vec::new();

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => flags = parse_i16(&value, "SPLINE 类型标志（组码 70）")?,
                    10 => {
                        if !pending.is_empty() {
                            slots.push(pending);
                        }
                        pending = CoordSlot {
                            x: Some(parse_f64(&value, "SPLINE 控制点 X（组码 10）")?),
                            ..CoordSlot::default()
                        };
                    }
                    20 => assign_coord(&mut pending.y, &value, "SPLINE 控制点 Y（组码 20）")?,
                    30 => assign_coord(&mut pending.z, &value, "SPLINE 控制点 Z（组码 30）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("SPLINE 未正确结束")),
            }
        }
        if !pending.is_empty() {
            slots.push(pending);
        }

        let vertices: Vec<PolylineVertex> = slots
            .iter()
            .map(|slot| PolylineVertex::new(self.resolve_point(slot, "SPLINE 控制点")))
            .collect();
        if vertices.len() < 2 {
            self.record(Diagnostic::degenerate(format!(
                "SPLINE 只有 {} 个控制点，已跳过",
                vertices.len()
            )));
            return Ok(None);
        }

        Ok(Some(Entity::Polyline(Polyline {
            vertices,
            is_closed: flags & 0x01 != 0,
            layer: layer_or_default(layer),
        })))
    }

    /// 第 4 个顶点缺省或与第 3 个重合时为三角形。
    fn parse_3dface(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut corners = [CoordSlot::default(); 4];

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut corners[0].x, &value, "3DFACE 顶点 1 X（组码 10）")?,
                    20 => assign_coord(&mut corners[0].y, &value, "3DFACE 顶点 1 Y（组码 20）")?,
                    30 => assign_coord(&mut corners[0].z, &value, "3DFACE 顶点 1 Z（组码 30）")?,
                    11 => assign_coord(&mut corners[1].x, &value, "3DFACE 顶点 2 X（组码 11）")?,
                    21 => assign_coord(&mut corners[1].y, &value, "3DFACE 顶点 2 Y（组码 21）")?,
                    31 => assign_coord(&mut corners[1].z, &value, "3DFACE 顶点 2 Z（组码 31）")?,
                    12 => assign_coord(&mut corners[2].x, &value, "3DFACE 顶点 3 X（组码 12）")?,
                    22 => assign_coord(&mut corners[2].y, &value, "3DFACE 顶点 3 Y（组码 22）")?,
                    32 => assign_coord(&mut corners[2].z, &value, "3DFACE 顶点 3 Z（组码 32）")?,
                    13 => assign_coord(&mut corners[3].x, &value, "3DFACE 顶点 4 X（组码 13）")?,
                    23 => assign_coord(&mut corners[3].y, &value, "3DFACE 顶点 4 Y（组码 23）")?,
                    33 => assign_coord(&mut corners[3].z, &value, "3DFACE 顶点 4 Z（组码 33）")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("3DFACE 未正确结束")),
            }
        }

        let layer = layer_or_default(layer);
        let v1 = self.resolve_point(&corners[0], "3DFACE 顶点 1");
        let v2 = self.resolve_point(&corners[1], "3DFACE 顶点 2");
        let v3 = self.resolve_point(&corners[2], "3DFACE 顶点 3");
        let v4 = if corners[3].is_empty() {
            v3
        } else {
            self.resolve_point(&corners[3], "3DFACE 顶点 4")
        };

        let mesh = if v4 == v3 {
            Mesh::new(vec![v1, v2, v3], vec![Face::Triangle([0, 1, 2])], layer)
        } else {
            Mesh::new(vec![v1, v2, v3, v4], vec![Face::Quad([0, 1, 2, 3])], layer)
        };
        Ok(Entity::Mesh(mesh))
    }

    /// MESH 实体：组码 92 后为顶点，组码 93 后为按“数量+索引”编码的面列表（组码 90）。
    /// 缺少组码 93 的变体把顶点之后、边列表之前的全部组码 90 视为面列表。
    fn parse_mesh(&mut self) -> Result<Option<Entity>, DxfError> {
        let mut layer = None;
        let mut stage = MeshStage::Header;
        let mut declared_vertices: Option<i32> = None;
        let mut pending = CoordSlot::default();
        let mut slots: Vec<CoordSlot> = Vec::new();
        let mut face_list: Vec<i64> = Vec::new();
        let mut trailing: Vec<i64> = Vec::new();
        let mut declared_face_list: Option<usize> = None;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    92 => {
                        declared_vertices = Some(parse_i32(&value, "MESH 顶点数（组码 92）")?);
                        stage = MeshStage::Vertices;
                    }
                    10 if stage == MeshStage::Vertices => {
                        if !pending.is_empty() {
                            slots.push(pending);
                        }
                        pending = CoordSlot {
                            x: Some(parse_f64(&value, "MESH 顶点 X（组码 10）")?),
                            ..CoordSlot::default()
                        };
                    }
                    20 if stage == MeshStage::Vertices => {
                        assign_coord(&mut pending.y, &value, "MESH 顶点 Y（组码 20）")?
                    }
                    30 if stage == MeshStage::Vertices => {
                        assign_coord(&mut pending.z, &value, "MESH 顶点 Z（组码 30）")?
                    }
                    93 => {
                        let declared = parse_i32(&value, "MESH 面列表长度（组码 93）")?;
                        declared_face_list = Some(declared.max(0) as usize);
                        stage = MeshStage::Faces;
                    }
                    90 => {
                        let entry = i64::from(parse_i32(&value, "MESH 面列表项（组码 90）")?);
                        match stage {
                            MeshStage::Faces => face_list.push(entry),
                            MeshStage::Vertices => trailing.push(entry),
                            MeshStage::Header | MeshStage::Trailer => {}
                        }
                    }
                    94 | 95 => stage = MeshStage::Trailer,
                    _ => {}
                },
                None => return Err(DxfError::invalid("MESH 未正确结束")),
            }
        }
        if !pending.is_empty() {
            slots.push(pending);
        }

        let vertices: Vec<Point3> = slots
            .iter()
            .map(|slot| self.resolve_point(slot, "MESH 顶点"))
            .collect();
        if let Some(declared) = declared_vertices {
            if declared as usize != vertices.len() {
                debug!(
                    declared,
                    actual = vertices.len(),
                    "MESH 声明的顶点数与实际不符"
                );
            }
        }

        let encoded = if let Some(declared) = declared_face_list {
            if face_list.len() > declared {
                debug!(
                    declared,
                    actual = face_list.len(),
                    "MESH 面列表超出声明长度，多余项已忽略"
                );
                face_list.truncate(declared);
            } else if face_list.len() < declared {
                self.record(Diagnostic::degenerate(format!(
                    "MESH 面列表声明 {declared} 项，实际只有 {} 项",
                    face_list.len()
                )));
            }
            face_list
        } else {
            debug!(entries = trailing.len(), "MESH 缺少面列表长度，按尾随组码 90 解码");
            trailing
        };
        let faces = self.decode_face_runs(&encoded, vertices.len());

        self.finish_mesh("MESH", vertices, faces, layer_or_default(layer))
    }

    fn decode_face_runs(&mut self, encoded: &[i64], vertex_count: usize) -> Vec<Face> {
        let mut faces = Vec::new();
        let mut cursor = 0;
        while cursor < encoded.len() {
            let count = encoded[cursor];
            cursor += 1;
            if count <= 0 {
                self.record(Diagnostic::degenerate(format!(
                    "MESH 面顶点数 {count} 无效，后续面列表已忽略"
                )));
                break;
            }
            let count = count as usize;
            if cursor + count > encoded.len() {
                self.record(Diagnostic::degenerate(
                    "MESH 面列表被截断，最后一个面已忽略",
                ));
                break;
            }
            let run = &encoded[cursor..cursor + count];
            cursor += count;

            if run
                .iter()
                .any(|&index| index < 0 || index as usize >= vertex_count)
            {
                self.record(Diagnostic::degenerate(format!(
                    "MESH 面引用了越界的顶点索引 {run:?}，已跳过"
                )));
                continue;
            }
            let indices: Vec<u32> = run.iter().map(|&index| index as u32).collect();
            let polygon = polygon_faces(&indices);
            if polygon.is_empty() {
                self.record(Diagnostic::degenerate(format!(
                    "MESH 面只有 {count} 个顶点，已跳过"
                )));
            }
            faces.extend(polygon);
        }
        faces
    }

    fn finish_mesh(
        &mut self,
        kind: &str,
        vertices: Vec<Point3>,
        faces: Vec<Face>,
        layer: String,
    ) -> Result<Option<Entity>, DxfError> {
        if vertices.is_empty() || faces.is_empty() {
            self.record(Diagnostic::degenerate(format!(
                "{kind} 没有可用的顶点或面，已跳过"
            )));
            return Ok(None);
        }
        Ok(Some(Entity::Mesh(Mesh::new(vertices, faces, layer))))
    }

    fn parse_insert(&mut self) -> Result<Entity, DxfError> {
        let mut layer = None;
        let mut name = None;
        let mut insert = CoordSlot::default();
        let mut scale = [1.0f64; 3];
        let mut rotation_deg: f64 = 0.0;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    2 => {
                        if name.is_some() {
                            return Err(DxfError::invalid("INSERT 遇到重复的块名（组码 2）"));
                        }
                        name = Some(value.trim().to_string());
                    }
                    10 => assign_coord(&mut insert.x, &value, "INSERT 插入点 X（组码 10）")?,
                    20 => assign_coord(&mut insert.y, &value, "INSERT 插入点 Y（组码 20）")?,
                    30 => assign_coord(&mut insert.z, &value, "INSERT 插入点 Z（组码 30）")?,
                    41 => scale[0] = parse_f64(&value, "INSERT 缩放 X")?,
                    42 => scale[1] = parse_f64(&value, "INSERT 缩放 Y")?,
                    43 => scale[2] = parse_f64(&value, "INSERT 缩放 Z")?,
                    50 => rotation_deg = parse_f64(&value, "INSERT 旋转角")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("INSERT 未正确结束")),
            }
        }

        // 属性记录只跟随在 INSERT 之后，不参与几何
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.trim() {
                    "ATTRIB" => self.skip_entity_body()?,
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some((code, value)) => {
                    return Err(DxfError::invalid(format!(
                        "INSERT 属性段出现意外组码 {code} 值 {value}"
                    )));
                }
                None => break,
            }
        }

        let name = name.ok_or_else(|| DxfError::invalid("INSERT 缺少块名（组码 2）"))?;
        let insert = self.resolve_point(&insert, "INSERT 插入点");
        Ok(Entity::BlockInstance(BlockInstance {
            block: name,
            insert,
            scale: Vector3::new(scale[0], scale[1], scale[2]),
            rotation: rotation_deg.to_radians(),
            layer: layer_or_default(layer),
        }))
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }

    /// 坐标不完整时回退为原点并记录诊断，不中断转换。
    fn resolve_point(&mut self, slot: &CoordSlot, context: &str) -> Point3 {
        match Point3::from_slice(&slot.components()) {
            Some(point) => point,
            None => {
                self.record(Diagnostic::malformed_point(format!(
                    "{context} 坐标不完整，已回退为原点"
                )));
                Point3::ORIGIN
            }
        }
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        warn!(
            kind = diagnostic.kind.describe(),
            line = self.reader.line_number,
            "{}",
            diagnostic.message
        );
        self.diagnostics.push(diagnostic);
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.trim_start_matches('\u{feff}').lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    break line;
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF pair 只能回退一次");
        self.buffer = Some(pair);
    }
}

fn layer_or_default(layer: Option<String>) -> String {
    layer
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "0".to_string())
}

fn extrusion_direction(slot: &CoordSlot) -> Vector3 {
    if slot.is_empty() {
        return Vector3::UNIT_Z;
    }
    Vector3::new(
        slot.x.unwrap_or(0.0),
        slot.y.unwrap_or(0.0),
        slot.z.unwrap_or(1.0),
    )
    .normalize()
    .unwrap_or(Vector3::UNIT_Z)
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use choras_core::diagnostics::DiagnosticKind;

    fn dxf(pairs: &[(i32, &str)]) -> String {
        let mut out = String::new();
        for (code, value) in pairs {
            out.push_str(&format!("{code}\n{value}\n"));
        }
        out
    }

    fn entities_section(body: &[(i32, &str)]) -> String {
        let mut pairs = vec![(0, "SECTION"), (2, "ENTITIES")];
        pairs.extend_from_slice(body);
        pairs.extend_from_slice(&[(0, "ENDSEC"), (0, "EOF")]);
        dxf(&pairs)
    }

    fn assert_close(actual: Point3, expected: (f64, f64, f64)) {
        assert!(
            (actual.x() - expected.0).abs() < 1e-9
                && (actual.y() - expected.1).abs() < 1e-9
                && (actual.z() - expected.2).abs() < 1e-9,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn line_is_rotated_to_y_up() {
        let source = entities_section(&[
            (0, "LINE"),
            (8, "WALLS"),
            (10, "1.0"),
            (20, "2.0"),
            (30, "3.0"),
            (11, "4.0"),
            (21, "5.0"),
            (31, "6.0"),
        ]);
        let report = import_dxf(&source, "line", DEFAULT_BATCH_SIZE).expect("import");
        let (_, entity) = report.document.entities().next().expect("line");
        match entity {
            Entity::Line(line) => {
                assert_close(line.start, (1.0, -3.0, 2.0));
                assert_close(line.end, (4.0, -6.0, 5.0));
                assert_eq!(line.layer, "WALLS");
            }
            other => panic!("expected line, got {other:?}"),
        }
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn arc_samples_midpoint_across_zero_angle() {
        let source = entities_section(&[
            (0, "ARC"),
            (10, "0.0"),
            (20, "0.0"),
            (30, "0.0"),
            (40, "2.0"),
            (50, "270.0"),
            (51, "90.0"),
        ]);
        let report = import_dxf(&source, "arc", DEFAULT_BATCH_SIZE).expect("import");
        let (_, entity) = report.document.entities().next().expect("arc");
        match entity {
            Entity::Arc(arc) => {
                // 270° → 450°，中点在 360°，即 CAD (2,0,0)
                assert_close(arc.mid, (2.0, 0.0, 0.0));
                assert_close(arc.start, (0.0, 0.0, -2.0));
                assert!((arc.radius - 2.0).abs() < 1e-12);
            }
            other => panic!("expected arc, got {other:?}"),
        }
    }

    #[test]
    fn three_dface_with_repeated_corner_is_triangle() {
        let source = entities_section(&[
            (0, "3DFACE"),
            (10, "0"),
            (20, "0"),
            (30, "0"),
            (11, "1"),
            (21, "0"),
            (31, "0"),
            (12, "1"),
            (22, "1"),
            (32, "0"),
            (13, "1"),
            (23, "1"),
            (33, "0"),
        ]);
        let report = import_dxf(&source, "face", DEFAULT_BATCH_SIZE).expect("import");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.faces, vec![Face::Triangle([0, 1, 2])]);
        assert_eq!(mesh.material, None);
        assert_eq!(mesh.layer_index, Some(1));
    }

    #[test]
    fn mesh_entity_decodes_face_list() {
        let source = entities_section(&[
            (0, "MESH"),
            (8, "FLOOR"),
            (92, "4"),
            (10, "0"),
            (20, "0"),
            (30, "0"),
            (10, "1"),
            (20, "0"),
            (30, "0"),
            (10, "1"),
            (20, "1"),
            (30, "0"),
            (10, "0"),
            (20, "1"),
            (30, "0"),
            (93, "5"),
            (90, "4"),
            (90, "0"),
            (90, "1"),
            (90, "2"),
            (90, "3"),
            (94, "0"),
        ]);
        let report = import_dxf(&source, "mesh", DEFAULT_BATCH_SIZE).expect("import");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.faces, vec![Face::Quad([0, 1, 2, 3])]);
    }

    fn triangle_mesh_with_face_list(declared: &'static str, entries: &[&'static str]) -> String {
        let mut body: Vec<(i32, &str)> = vec![
            (0, "MESH"),
            (92, "3"),
            (10, "0"),
            (20, "0"),
            (30, "0"),
            (10, "1"),
            (20, "0"),
            (30, "0"),
            (10, "0"),
            (20, "1"),
            (30, "0"),
            (93, declared),
        ];
        body.extend(entries.iter().map(|&entry| (90, entry)));
        entities_section(&body)
    }

    #[test]
    fn mesh_face_list_stops_at_declared_length() {
        let source = triangle_mesh_with_face_list("4", &["3", "0", "1", "2", "3", "2", "1", "0"]);
        let report = import_dxf(&source, "mesh", DEFAULT_BATCH_SIZE).expect("import");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.faces, vec![Face::Triangle([0, 1, 2])]);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn mesh_face_list_shorter_than_declared_is_reported() {
        let source = triangle_mesh_with_face_list("8", &["3", "0", "1", "2"]);
        let report = import_dxf(&source, "mesh", DEFAULT_BATCH_SIZE).expect("import");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.faces, vec![Face::Triangle([0, 1, 2])]);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::DegenerateTopology);
    }

    #[test]
    fn mesh_entity_without_face_list_size_uses_trailing_entries() {
        let source = entities_section(&[
            (0, "MESH"),
            (92, "3"),
            (10, "0"),
            (20, "0"),
            (30, "0"),
            (10, "1"),
            (20, "0"),
            (30, "0"),
            (10, "0"),
            (20, "1"),
            (30, "0"),
            (90, "3"),
            (90, "0"),
            (90, "1"),
            (90, "2"),
        ]);
        let report = import_dxf(&source, "mesh", DEFAULT_BATCH_SIZE).expect("import");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.faces, vec![Face::Triangle([0, 1, 2])]);
    }

    #[test]
    fn polyface_polyline_becomes_mesh() {
        let source = entities_section(&[
            (0, "POLYLINE"),
            (66, "1"),
            (70, "64"),
            (71, "3"),
            (72, "1"),
            (0, "VERTEX"),
            (10, "0"),
            (20, "0"),
            (30, "0"),
            (70, "192"),
            (0, "VERTEX"),
            (10, "1"),
            (20, "0"),
            (30, "0"),
            (70, "192"),
            (0, "VERTEX"),
            (10, "0"),
            (20, "1"),
            (30, "0"),
            (70, "192"),
            (0, "VERTEX"),
            (10, "0"),
            (20, "0"),
            (30, "0"),
            (70, "128"),
            (71, "1"),
            (72, "2"),
            (73, "-3"),
            (0, "SEQEND"),
        ]);
        let report = import_dxf(&source, "polyface", DEFAULT_BATCH_SIZE).expect("import");
        let (_, mesh) = report.document.meshes().next().expect("mesh");
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.faces, vec![Face::Triangle([0, 1, 2])]);
    }

    #[test]
    fn missing_coordinate_falls_back_to_origin() {
        let source = entities_section(&[
            (0, "POINT"),
            (10, "5.0"),
            (0, "LINE"),
            (10, "0"),
            (20, "0"),
            (11, "1"),
            (21, "1"),
        ]);
        let report = import_dxf(&source, "points", DEFAULT_BATCH_SIZE).expect("import");
        assert_eq!(report.document.entity_count(), 2);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::MalformedPoint);
        match report.document.entities().next().map(|(_, entity)| entity) {
            Some(Entity::Point(point)) => assert_eq!(point.position, Point3::ORIGIN),
            other => panic!("expected point, got {other:?}"),
        }
    }

    #[test]
    fn small_batches_keep_entity_order() {
        let mut body = Vec::new();
        let xs = ["0", "1", "2", "3", "4"];
        for x in xs {
            body.extend_from_slice(&[(0, "POINT"), (10, x), (20, "0"), (30, "0")]);
        }
        let source = entities_section(&body);
        let report = import_dxf(&source, "batched", 2).expect("import");
        let xs: Vec<f64> = report
            .document
            .entities()
            .filter_map(|(_, entity)| match entity {
                Entity::Point(point) => Some(point.position.x()),
                _ => None,
            })
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn non_numeric_group_code_is_invalid() {
        let source = "0\nSECTION\n2\nENTITIES\nabc\nLINE\n";
        let err = import_dxf(source, "broken", DEFAULT_BATCH_SIZE).unwrap_err();
        assert!(matches!(err, DxfError::Invalid { .. }));
    }

    #[test]
    fn unterminated_section_is_invalid() {
        let source = dxf(&[(0, "SECTION"), (2, "HEADER"), (9, "$ACADVER"), (1, "AC1027")]);
        let err = import_dxf(&source, "broken", DEFAULT_BATCH_SIZE).unwrap_err();
        assert!(err.into_message().contains("ENDSEC"));
    }
}
