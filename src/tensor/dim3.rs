//! Sum-factorized kernels on cubes.
//!
//! Same table conventions as the 2D kernels; scalar dof arrays are `[(dz * nd + dy) * nd + dx]`,
//! point arrays `[(qz * nq + qy) * nq + qx]`, gradient arrays `[(q * 3 + c) * 3 + k]`.

pub(super) fn values(b: &[f64], nd: usize, nq: usize, u: &[f64], out: &mut [f64]) {
    let nq2 = nq * nq;
    out[..nq2 * nq].fill(0.0);
    let mut ux = vec![0.0; nq];
    let mut uxy = vec![0.0; nq2];

    for dz in 0..nd {
        uxy.fill(0.0);
        for dy in 0..nd {
            let row = &u[(dz * nd + dy) * nd..(dz * nd + dy + 1) * nd];
            for (qx, ux_q) in ux.iter_mut().enumerate() {
                *ux_q = row.iter().enumerate().map(|(dx, u)| b[qx * nd + dx] * u).sum();
            }
            for qy in 0..nq {
                let wy = b[qy * nd + dy];
                for qx in 0..nq {
                    uxy[qy * nq + qx] += wy * ux[qx];
                }
            }
        }
        for qz in 0..nq {
            let wz = b[qz * nd + dz];
            for (qxy, v) in uxy.iter().enumerate() {
                out[qz * nq2 + qxy] += wz * v;
            }
        }
    }
}

pub(super) fn values_transpose(bt: &[f64], nd: usize, nq: usize, s: &[f64], out: &mut [f64]) {
    let (nq2, nd2) = (nq * nq, nd * nd);
    out[..nd2 * nd].fill(0.0);
    let mut sx = vec![0.0; nd];
    let mut sxy = vec![0.0; nd2];

    for qz in 0..nq {
        sxy.fill(0.0);
        for qy in 0..nq {
            for (dx, sx_d) in sx.iter_mut().enumerate() {
                *sx_d = (0..nq)
                    .map(|qx| bt[dx * nq + qx] * s[qz * nq2 + qy * nq + qx])
                    .sum();
            }
            for dy in 0..nd {
                let wy = bt[dy * nq + qy];
                for dx in 0..nd {
                    sxy[dy * nd + dx] += wy * sx[dx];
                }
            }
        }
        for dz in 0..nd {
            let wz = bt[dz * nq + qz];
            for (dxy, v) in sxy.iter().enumerate() {
                out[dz * nd2 + dxy] += wz * v;
            }
        }
    }
}

pub(super) fn vector_grad(b: &[f64], g: &[f64], nd: usize, nq: usize, x: &[f64], out: &mut [f64]) {
    let (nq2, nd3) = (nq * nq, nd * nd * nd);
    out[..nq2 * nq * 9].fill(0.0);
    let (mut vx, mut vdx) = (vec![0.0; nq], vec![0.0; nq]);
    let (mut xy, mut xy_dx, mut xy_dy) = (vec![0.0; nq2], vec![0.0; nq2], vec![0.0; nq2]);

    for c in 0..3 {
        let xc = &x[c * nd3..(c + 1) * nd3];
        for dz in 0..nd {
            xy.fill(0.0);
            xy_dx.fill(0.0);
            xy_dy.fill(0.0);
            for dy in 0..nd {
                for qx in 0..nq {
                    let (mut v, mut dv) = (0.0, 0.0);
                    for dx in 0..nd {
                        let xv = xc[(dz * nd + dy) * nd + dx];
                        v += b[qx * nd + dx] * xv;
                        dv += g[qx * nd + dx] * xv;
                    }
                    vx[qx] = v;
                    vdx[qx] = dv;
                }
                for qy in 0..nq {
                    let (wy, wdy) = (b[qy * nd + dy], g[qy * nd + dy]);
                    for qx in 0..nq {
                        xy[qy * nq + qx] += vx[qx] * wy;
                        xy_dx[qy * nq + qx] += vdx[qx] * wy;
                        xy_dy[qy * nq + qx] += vx[qx] * wdy;
                    }
                }
            }
            for qz in 0..nq {
                let (wz, wdz) = (b[qz * nd + dz], g[qz * nd + dz]);
                for qxy in 0..nq2 {
                    let q = qz * nq2 + qxy;
                    out[(q * 3 + c) * 3] += xy_dx[qxy] * wz;
                    out[(q * 3 + c) * 3 + 1] += xy_dy[qxy] * wz;
                    out[(q * 3 + c) * 3 + 2] += xy[qxy] * wdz;
                }
            }
        }
    }
}

pub(super) fn grad_transpose(bt: &[f64], gt: &[f64], nd: usize, nq: usize, w: &[f64], out: &mut [f64]) {
    let (nq2, nd2) = (nq * nq, nd * nd);
    let nd3 = nd2 * nd;
    out[..3 * nd3].fill(0.0);
    let (mut s0, mut s1, mut s2) = (vec![0.0; nd], vec![0.0; nd], vec![0.0; nd]);
    let (mut a0, mut a1, mut a2) = (vec![0.0; nd2], vec![0.0; nd2], vec![0.0; nd2]);

    for c in 0..3 {
        for qz in 0..nq {
            a0.fill(0.0);
            a1.fill(0.0);
            a2.fill(0.0);
            for qy in 0..nq {
                for dx in 0..nd {
                    let (mut t0, mut t1, mut t2) = (0.0, 0.0, 0.0);
                    for qx in 0..nq {
                        let base = ((qz * nq2 + qy * nq + qx) * 3 + c) * 3;
                        t0 += gt[dx * nq + qx] * w[base];
                        t1 += bt[dx * nq + qx] * w[base + 1];
                        t2 += bt[dx * nq + qx] * w[base + 2];
                    }
                    s0[dx] = t0;
                    s1[dx] = t1;
                    s2[dx] = t2;
                }
                for dy in 0..nd {
                    let (wy, wdy) = (bt[dy * nq + qy], gt[dy * nq + qy]);
                    for dx in 0..nd {
                        a0[dy * nd + dx] += s0[dx] * wy;
                        a1[dy * nd + dx] += s1[dx] * wdy;
                        a2[dy * nd + dx] += s2[dx] * wy;
                    }
                }
            }
            for dz in 0..nd {
                let (wz, wdz) = (bt[dz * nq + qz], gt[dz * nq + qz]);
                for dxy in 0..nd2 {
                    out[c * nd3 + dz * nd2 + dxy] += (a0[dxy] + a1[dxy]) * wz + a2[dxy] * wdz;
                }
            }
        }
    }
}
