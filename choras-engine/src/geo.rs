use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::errors::EngineError;
use crate::topology::{BoundaryDescription, physical_name};

/// 写在文件末尾的网格划分指令，以及每个点的特征长度。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MesherSettings {
    pub algorithm: u32,
    pub algorithm_3d: u32,
    pub characteristic_length_from_points: bool,
    pub point_characteristic_length: f64,
}

impl Default for MesherSettings {
    fn default() -> Self {
        Self {
            algorithm: 6,
            algorithm_3d: 1,
            characteristic_length_from_points: true,
            point_characteristic_length: 1.0,
        }
    }
}

/// 将拓扑提取结果序列化为 GEO 文本。
#[derive(Debug, Clone, Default)]
pub struct GeoWriter {
    settings: MesherSettings,
}

impl GeoWriter {
    pub fn new(settings: MesherSettings) -> Self {
        Self { settings }
    }

    pub fn render(&self, description: &BoundaryDescription) -> String {
        let mut out = String::new();
        let length = format_length(self.settings.point_characteristic_length);

        for (index, point) in description.points.iter().enumerate() {
            let [x, y, z] = point.formatted();
            let _ = writeln!(out, "Point({}) = {{{x}, {y}, {z}, {length}}};", index + 1);
        }

        for (index, (from, to)) in description.lines.iter().enumerate() {
            let _ = writeln!(out, "Line({}) = {{{from}, {to}}};", index + 1);
        }

        for (index, signed) in description.loops.iter().enumerate() {
            let id = index + 1;
            let _ = writeln!(out, "Line Loop({id}) = {{{}}};", join(signed));
            let _ = writeln!(out, "Plane Surface({id}) = {{{id}}};");
        }

        if description.surface_count() > 0 {
            let surfaces: Vec<u32> = description.surface_ids().collect();
            let _ = writeln!(out, "Surface Loop(1) = {{{}}};", join(&surfaces));
            let _ = writeln!(out, "Volume(1) = {{1}};");
            let _ = writeln!(
                out,
                "Physical Volume(\"{}\") = {{1}};",
                physical_name(&description.volume_name)
            );
        }

        for group in &description.groups {
            let _ = writeln!(
                out,
                "Physical Surface(\"{}\") = {{{}}};",
                physical_name(&group.name),
                join(&group.surfaces)
            );
        }

        if description.line_count() > 0 {
            let lines: Vec<u32> = description.line_ids().collect();
            let _ = writeln!(out, "Physical Line(\"default\") = {{{}}};", join(&lines));
        }

        let _ = writeln!(out, "Mesh.Algorithm = {};", self.settings.algorithm);
        let _ = writeln!(out, "Mesh.Algorithm3D = {};", self.settings.algorithm_3d);
        let _ = writeln!(
            out,
            "Mesh.CharacteristicLengthFromPoints = {};",
            u8::from(self.settings.characteristic_length_from_points)
        );
        out
    }

    pub fn write(&self, description: &BoundaryDescription, path: &Path) -> Result<(), EngineError> {
        let text = self.render(description);
        fs::write(path, text).map_err(|source| EngineError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            points = description.point_count(),
            surfaces = description.surface_count(),
            "已写出 GEO 文件"
        );
        Ok(())
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_length(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}
