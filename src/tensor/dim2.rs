//! Sum-factorized kernels on squares.
//!
//! `b`, `g`: 1D values/derivatives `[q * nd + d]`; `bt`, `gt`: the same tables stored `[d * nq + q]`.
//! Scalar dof arrays are `[dy * nd + dx]`, point arrays `[qy * nq + qx]`, and gradient arrays
//! `[(q * 2 + c) * 2 + k]`.

/// Interpolate a scalar field to the quadrature points
pub(super) fn values(b: &[f64], nd: usize, nq: usize, u: &[f64], out: &mut [f64]) {
    out[..nq * nq].fill(0.0);
    let mut ux = vec![0.0; nq];
    for dy in 0..nd {
        for (qx, ux_q) in ux.iter_mut().enumerate() {
            *ux_q = (0..nd).map(|dx| b[qx * nd + dx] * u[dy * nd + dx]).sum();
        }
        for qy in 0..nq {
            let wy = b[qy * nd + dy];
            for qx in 0..nq {
                out[qy * nq + qx] += wy * ux[qx];
            }
        }
    }
}

/// Transpose of [values]
pub(super) fn values_transpose(bt: &[f64], nd: usize, nq: usize, s: &[f64], out: &mut [f64]) {
    out[..nd * nd].fill(0.0);
    let mut sx = vec![0.0; nd];
    for qy in 0..nq {
        for (dx, sx_d) in sx.iter_mut().enumerate() {
            *sx_d = (0..nq).map(|qx| bt[dx * nq + qx] * s[qy * nq + qx]).sum();
        }
        for dy in 0..nd {
            let wy = bt[dy * nq + qy];
            for dx in 0..nd {
                out[dy * nd + dx] += wy * sx[dx];
            }
        }
    }
}

/// Reference gradient of a 2-component field at the quadrature points
pub(super) fn vector_grad(b: &[f64], g: &[f64], nd: usize, nq: usize, x: &[f64], out: &mut [f64]) {
    let nd2 = nd * nd;
    out[..nq * nq * 4].fill(0.0);
    let (mut vx, mut vdx) = (vec![0.0; nq], vec![0.0; nq]);

    for c in 0..2 {
        let xc = &x[c * nd2..(c + 1) * nd2];
        for dy in 0..nd {
            for qx in 0..nq {
                let (mut v, mut dv) = (0.0, 0.0);
                for dx in 0..nd {
                    let xv = xc[dy * nd + dx];
                    v += b[qx * nd + dx] * xv;
                    dv += g[qx * nd + dx] * xv;
                }
                vx[qx] = v;
                vdx[qx] = dv;
            }
            for qy in 0..nq {
                let (wy, wdy) = (b[qy * nd + dy], g[qy * nd + dy]);
                for qx in 0..nq {
                    let q = qy * nq + qx;
                    out[(q * 2 + c) * 2] += vdx[qx] * wy;
                    out[(q * 2 + c) * 2 + 1] += vx[qx] * wdy;
                }
            }
        }
    }
}

/// Transpose of [vector_grad]
pub(super) fn grad_transpose(bt: &[f64], gt: &[f64], nd: usize, nq: usize, w: &[f64], out: &mut [f64]) {
    let nd2 = nd * nd;
    out[..2 * nd2].fill(0.0);
    let (mut wx0, mut wx1) = (vec![0.0; nd], vec![0.0; nd]);

    for c in 0..2 {
        for qy in 0..nq {
            for dx in 0..nd {
                let (mut a0, mut a1) = (0.0, 0.0);
                for qx in 0..nq {
                    let q = qy * nq + qx;
                    a0 += gt[dx * nq + qx] * w[(q * 2 + c) * 2];
                    a1 += bt[dx * nq + qx] * w[(q * 2 + c) * 2 + 1];
                }
                wx0[dx] = a0;
                wx1[dx] = a1;
            }
            for dy in 0..nd {
                let (wy, wdy) = (bt[dy * nq + qy], gt[dy * nq + qy]);
                for dx in 0..nd {
                    out[c * nd2 + dy * nd + dx] += wx0[dx] * wy + wx1[dx] * wdy;
                }
            }
        }
    }
}
