use std::fmt;

use crate::native::PrimitiveType;

/// Source-API primitive topologies supported by the recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl fmt::Display for PrimitiveTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimitiveTopology::PointList => "point_list",
            PrimitiveTopology::LineList => "line_list",
            PrimitiveTopology::LineStrip => "line_strip",
            PrimitiveTopology::TriangleList => "triangle_list",
            PrimitiveTopology::TriangleStrip => "triangle_strip",
            PrimitiveTopology::TriangleFan => "triangle_fan",
        };
        f.write_str(s)
    }
}

impl PrimitiveTopology {
    /// Native primitive type drawn for this topology.
    ///
    /// Fans have no native equivalent and are always drawn as the triangle list produced by
    /// emulation.
    pub fn native_primitive(self) -> PrimitiveType {
        match self {
            PrimitiveTopology::PointList => PrimitiveType::Point,
            PrimitiveTopology::LineList => PrimitiveType::Line,
            PrimitiveTopology::LineStrip => PrimitiveType::LineStrip,
            PrimitiveTopology::TriangleList => PrimitiveType::Triangle,
            PrimitiveTopology::TriangleStrip => PrimitiveType::TriangleStrip,
            PrimitiveTopology::TriangleFan => PrimitiveType::Triangle,
        }
    }

    /// Primitive type of the list an emulated draw of this topology produces.
    pub fn decomposed_primitive(self) -> PrimitiveType {
        match self {
            PrimitiveTopology::PointList => PrimitiveType::Point,
            PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => PrimitiveType::Line,
            PrimitiveTopology::TriangleList
            | PrimitiveTopology::TriangleStrip
            | PrimitiveTopology::TriangleFan => PrimitiveType::Triangle,
        }
    }

    /// Vertices per decomposed primitive.
    pub fn vertices_per_primitive(self) -> u32 {
        match self {
            PrimitiveTopology::PointList => 1,
            PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => 2,
            PrimitiveTopology::TriangleList
            | PrimitiveTopology::TriangleStrip
            | PrimitiveTopology::TriangleFan => 3,
        }
    }

    /// Number of list primitives `vertices` vertices decompose into.
    pub fn decomposed_primitives(self, vertices: u32) -> u32 {
        match self {
            PrimitiveTopology::PointList => vertices,
            PrimitiveTopology::LineList => vertices / 2,
            PrimitiveTopology::LineStrip => vertices.saturating_sub(1),
            PrimitiveTopology::TriangleList => vertices / 3,
            PrimitiveTopology::TriangleStrip | PrimitiveTopology::TriangleFan => {
                vertices.saturating_sub(2)
            }
        }
    }

    /// Worst-case index count of the decomposed list for `vertices` input vertices.
    pub fn decomposed_index_count(self, vertices: u32) -> u32 {
        self.decomposed_primitives(vertices)
            .saturating_mul(self.vertices_per_primitive())
    }

    /// Whether the native API treats the all-ones index as a restart for this topology.
    ///
    /// The native API always restarts strips and cannot turn it off.
    pub fn native_restart_always_on(self) -> bool {
        matches!(
            self,
            PrimitiveTopology::LineStrip
                | PrimitiveTopology::TriangleStrip
                | PrimitiveTopology::TriangleFan
        )
    }

    /// Index (relative to the primitive's first vertex) of vertex `vertex` of primitive `prim`,
    /// with the first vertex of every output primitive being the provoking vertex.
    fn vertex_id(self, prim: u32, vertex: u32) -> u32 {
        match self {
            PrimitiveTopology::PointList => prim,
            PrimitiveTopology::LineList => prim * 2 + vertex,
            PrimitiveTopology::LineStrip => prim + vertex,
            PrimitiveTopology::TriangleList => prim * 3 + vertex,
            PrimitiveTopology::TriangleStrip => {
                // Odd triangles swap their last two vertices to keep the winding.
                let swap = prim & 1 == 1 && vertex > 0;
                prim + if swap { 3 - vertex } else { vertex }
            }
            PrimitiveTopology::TriangleFan => match vertex {
                0 => prim + 1,
                1 => prim + 2,
                _ => 0,
            },
        }
    }
}

/// CPU reference of the index decomposition the emulation kernel performs.
///
/// Splits `indices` at `restart` (when given), then rewrites every segment as a list of
/// `topology.decomposed_primitive()` primitives. Incomplete trailing primitives are dropped.
pub fn decompose_indices(
    topology: PrimitiveTopology,
    indices: &[u32],
    restart: Option<u32>,
) -> Vec<u32> {
    let per_prim = topology.vertices_per_primitive();
    let mut out = Vec::with_capacity(topology.decomposed_index_count(indices.len() as u32) as usize);

    let segments: Box<dyn Iterator<Item = &[u32]>> = match restart {
        Some(cut) => Box::new(indices.split(move |&i| i == cut)),
        None => Box::new(std::iter::once(indices)),
    };
    for segment in segments {
        let prims = topology.decomposed_primitives(segment.len() as u32);
        for prim in 0..prims {
            for vertex in 0..per_prim {
                out.push(segment[topology.vertex_id(prim, vertex) as usize]);
            }
        }
    }
    out
}

/// Decompose a non-indexed draw of `vertex_count` vertices starting at `first_vertex`.
pub fn decompose_vertices(
    topology: PrimitiveTopology,
    first_vertex: u32,
    vertex_count: u32,
) -> Vec<u32> {
    let indices: Vec<u32> = (first_vertex..first_vertex.saturating_add(vertex_count)).collect();
    decompose_indices(topology, &indices, None)
}

/// Expand a triangle fan into a triangle list: triangle `i` is `(i + 1, i + 2, 0)`.
pub fn decompose_triangle_fan(indices: &[u32]) -> Vec<u32> {
    decompose_indices(PrimitiveTopology::TriangleFan, indices, None)
}

/// Expand a strip with restart disabled: every index is a vertex, including all-ones values.
pub fn decompose_strip_without_restart(topology: PrimitiveTopology, indices: &[u32]) -> Vec<u32> {
    debug_assert!(matches!(
        topology,
        PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip
    ));
    decompose_indices(topology, indices, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn triangle_fan_expands_with_first_vertex_provoking() {
        let expanded = decompose_triangle_fan(&[10, 11, 12, 13]);
        assert_eq!(expanded, vec![11, 12, 10, 12, 13, 10]);
    }

    #[test]
    fn triangle_fan_index_count_is_three_per_triangle() {
        for n in 3..40u32 {
            let indices: Vec<u32> = (0..n).collect();
            assert_eq!(decompose_triangle_fan(&indices).len() as u32, 3 * (n - 2));
            assert_eq!(
                PrimitiveTopology::TriangleFan.decomposed_index_count(n),
                3 * (n - 2)
            );
        }
    }

    #[test]
    fn degenerate_inputs_produce_nothing() {
        assert!(decompose_triangle_fan(&[]).is_empty());
        assert!(decompose_triangle_fan(&[1, 2]).is_empty());
        assert_eq!(PrimitiveTopology::TriangleStrip.decomposed_primitives(1), 0);
        assert_eq!(PrimitiveTopology::LineStrip.decomposed_primitives(0), 0);
    }

    #[test]
    fn triangle_strip_alternates_winding() {
        let out = decompose_strip_without_restart(PrimitiveTopology::TriangleStrip, &[0, 1, 2, 3, 4]);
        assert_eq!(out, vec![0, 1, 2, 1, 3, 2, 2, 3, 4]);
    }

    #[test]
    fn strip_without_restart_keeps_all_ones_index_as_vertex() {
        let out = decompose_strip_without_restart(PrimitiveTopology::LineStrip, &[0, 0xffff, 2]);
        assert_eq!(out, vec![0, 0xffff, 0xffff, 2]);
    }

    #[test]
    fn restart_splits_segments() {
        let out = decompose_indices(
            PrimitiveTopology::TriangleStrip,
            &[0, 1, 2, u32::MAX, 3, 4, 5, 6],
            Some(u32::MAX),
        );
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 4, 6, 5]);
    }

    #[test]
    fn nonindexed_fan_uses_first_vertex() {
        assert_eq!(
            decompose_vertices(PrimitiveTopology::TriangleFan, 4, 4),
            vec![5, 6, 4, 6, 7, 4]
        );
    }

    #[test]
    fn native_primitive_mapping() {
        assert_eq!(
            PrimitiveTopology::TriangleFan.native_primitive(),
            PrimitiveType::Triangle
        );
        assert_eq!(
            PrimitiveTopology::TriangleStrip.native_primitive(),
            PrimitiveType::TriangleStrip
        );
        assert_eq!(
            PrimitiveTopology::LineStrip.decomposed_primitive(),
            PrimitiveType::Line
        );
        assert_eq!(PrimitiveTopology::TriangleFan.to_string(), "triangle_fan");
    }
}
