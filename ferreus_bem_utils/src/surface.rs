/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines triangulated surfaces and the unit sphere test geometry.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;
use ferreus_bem::ClusterGeometry;
use std::collections::HashMap;

/// A triangulated surface with per-triangle geometric data.
///
/// Triangles are oriented counter-clockwise when seen from the side the
/// normals point to.
#[derive(Debug, Clone)]
pub struct Surface {
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[usize; 3]>,
    /// Unit normal of each triangle.
    pub normals: Vec<[f64; 3]>,
    pub areas: Vec<f64>,
    pub centroids: Vec<[f64; 3]>,
}

fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: &[f64; 3]) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

fn normalized(a: [f64; 3]) -> [f64; 3] {
    let n = norm(&a);
    [a[0] / n, a[1] / n, a[2] / n]
}

impl Surface {
    pub fn new(vertices: Vec<[f64; 3]>, triangles: Vec<[usize; 3]>) -> Self {
        let mut normals = Vec::with_capacity(triangles.len());
        let mut areas = Vec::with_capacity(triangles.len());
        let mut centroids = Vec::with_capacity(triangles.len());

        for t in &triangles {
            let [a, b, c] = t.map(|v| vertices[v]);
            let n = cross(&sub(&b, &a), &sub(&c, &a));
            let twice_area = norm(&n);
            areas.push(0.5 * twice_area);
            normals.push([n[0] / twice_area, n[1] / twice_area, n[2] / twice_area]);
            centroids.push(std::array::from_fn(|d| (a[d] + b[d] + c[d]) / 3.0));
        }

        Surface {
            vertices,
            triangles,
            normals,
            areas,
            centroids,
        }
    }

    /// Approximates the unit sphere by refining an octahedron `refinements`
    /// times. Every refinement splits each triangle into four, so the mesh
    /// has `8 · 4^refinements` triangles.
    pub fn unit_sphere(refinements: usize) -> Self {
        let mut vertices: Vec<[f64; 3]> = vec![
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
        ];

        let mut triangles = Vec::with_capacity(8);
        for (x, y, z) in [(0, 2, 4), (1, 2, 4), (0, 3, 4), (1, 3, 4), (0, 2, 5), (1, 2, 5), (0, 3, 5), (1, 3, 5)] {
            let n = cross(&sub(&vertices[y], &vertices[x]), &sub(&vertices[z], &vertices[x]));
            let outward: f64 = (0..3).map(|d| n[d] * (vertices[x][d] + vertices[y][d] + vertices[z][d])).sum();
            triangles.push(if outward > 0.0 { [x, y, z] } else { [x, z, y] });
        }

        for _ in 0..refinements {
            let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
            let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<[f64; 3]>| -> usize {
                *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
                    let m = normalized(std::array::from_fn(|d| 0.5 * (vertices[a][d] + vertices[b][d])));
                    vertices.push(m);
                    vertices.len() - 1
                })
            };

            let mut refined = Vec::with_capacity(4 * triangles.len());
            for [a, b, c] in triangles {
                let ab = midpoint(a, b, &mut vertices);
                let bc = midpoint(b, c, &mut vertices);
                let ca = midpoint(c, a, &mut vertices);
                refined.extend([[a, ab, ca], [ab, b, bc], [ca, bc, c], [ab, bc, ca]]);
            }
            triangles = refined;
        }

        Surface::new(vertices, triangles)
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn total_area(&self) -> f64 {
        self.areas.iter().sum()
    }

    /// For each vertex the triangles it belongs to, in increasing order.
    pub fn vertex_to_triangle(&self) -> Vec<Vec<usize>> {
        let mut v2t = vec![Vec::new(); self.vertices.len()];
        for (t, tri) in self.triangles.iter().enumerate() {
            for &v in tri {
                v2t[v].push(t);
            }
        }
        v2t
    }

    /// Triangle centroids as an `n × 3` matrix.
    pub fn centroid_matrix(&self) -> Mat<f64> {
        Mat::from_fn(self.centroids.len(), 3, |i, d| self.centroids[i][d])
    }

    /// Unit triangle normals as an `n × 3` matrix.
    pub fn normal_matrix(&self) -> Mat<f64> {
        Mat::from_fn(self.normals.len(), 3, |i, d| self.normals[i][d])
    }

    /// Piecewise constant degrees of freedom: one per triangle, located at
    /// its centroid and supported on the triangle.
    pub fn triangle_geometry(&self) -> ClusterGeometry {
        let bound = |t: usize, d: usize, pick: fn(f64, f64) -> f64| {
            let [a, b, c] = self.triangles[t];
            pick(pick(self.vertices[a][d], self.vertices[b][d]), self.vertices[c][d])
        };
        let n = self.triangles.len();
        ClusterGeometry {
            x: self.centroid_matrix(),
            smin: Mat::from_fn(n, 3, |t, d| bound(t, d, f64::min)),
            smax: Mat::from_fn(n, 3, |t, d| bound(t, d, f64::max)),
        }
    }

    /// Piecewise linear degrees of freedom: one per vertex, supported on the
    /// triangles around it.
    pub fn vertex_geometry(&self) -> ClusterGeometry {
        let n = self.vertices.len();
        let mut smin = Mat::from_fn(n, 3, |v, d| self.vertices[v][d]);
        let mut smax = smin.clone();
        for tri in &self.triangles {
            for &v in tri {
                for &w in tri {
                    for d in 0..3 {
                        smin[(v, d)] = smin[(v, d)].min(self.vertices[w][d]);
                        smax[(v, d)] = smax[(v, d)].max(self.vertices[w][d]);
                    }
                }
            }
        }
        ClusterGeometry {
            x: Mat::from_fn(n, 3, |v, d| self.vertices[v][d]),
            smin,
            smax,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn sphere_has_expected_topology() {
        let sphere = Surface::unit_sphere(3);
        assert_eq!(sphere.num_triangles(), 512);
        // Euler characteristic of a closed genus zero surface
        let edges = 3 * sphere.num_triangles() / 2;
        assert_eq!(sphere.num_vertices() + sphere.num_triangles() - edges, 2);

        for v in &sphere.vertices {
            assert_relative_eq!(norm(v), 1.0, epsilon = 1e-14);
        }
        assert!(sphere.total_area() < 4.0 * PI);
        assert!(sphere.total_area() > 0.95 * 4.0 * PI);
    }

    #[test]
    fn normals_point_outwards() {
        let sphere = Surface::unit_sphere(2);
        for (n, c) in sphere.normals.iter().zip(&sphere.centroids) {
            let dot: f64 = (0..3).map(|d| n[d] * c[d]).sum();
            assert!(dot > 0.9);
            assert_relative_eq!(norm(n), 1.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn vertex_adjacency_covers_every_corner() {
        let sphere = Surface::unit_sphere(1);
        let v2t = sphere.vertex_to_triangle();
        assert_eq!(v2t.iter().map(Vec::len).sum::<usize>(), 3 * sphere.num_triangles());
        // The six octahedron corners keep valence four
        for v in 0..6 {
            assert_eq!(v2t[v].len(), 4);
        }
        for (t, tri) in sphere.triangles.iter().enumerate() {
            for &v in tri {
                assert!(v2t[v].contains(&t));
            }
        }
    }

    #[test]
    fn support_boxes_contain_points() {
        let sphere = Surface::unit_sphere(2);
        for geometry in [sphere.triangle_geometry(), sphere.vertex_geometry()] {
            for i in 0..geometry.len() {
                for d in 0..3 {
                    assert!(geometry.smin[(i, d)] <= geometry.x[(i, d)]);
                    assert!(geometry.x[(i, d)] <= geometry.smax[(i, d)]);
                }
            }
        }
    }
}
