use must_toolbox::*;
use nalgebra::DMatrix;

fn argmax(image: &DMatrix<f64>) -> (usize, usize) {
    let mut best = ((0, 0), f64::NEG_INFINITY);
    for j in 0..image.ncols() {
        for i in 0..image.nrows() {
            if image[(i, j)] > best.1 {
                best = ((i, j), image[(i, j)]);
            }
        }
    }
    best.0
}

#[test]
fn point_scatterer_bmode() {
    let param = getparam(Probe::P4_2v);
    let delays = txdelay(&param, Transmit::Plane { tilt: 0. }).unwrap();
    let param = param.tx_delay(delays);
    let scatterers = Scatterers {
        x: vec![2e-3],
        y: vec![0.],
        z: vec![2.5e-2],
        rc: vec![1.],
    };
    let rf = simus(&scatterers, &param, &SimusOptions::default()).unwrap();
    let iq = rf2iq(&rf.data, rf.fs, Some(param.fc), rf.t0).unwrap();

    let x: Vec<f64> = (-20..=20).map(|i| i as f64 * 2.5e-4).collect();
    let z: Vec<f64> = (0..=40).map(|i| 2e-2 + i as f64 * 2.5e-4).collect();
    let grid = Grid::cartesian(&x, &z);
    let das = dasmtx(
        SignalKind::Iq,
        iq.shape(),
        &grid.points(),
        &param,
        Interpolation::Linear,
    )
    .unwrap();
    let beamformed = DMatrix::from_vec(z.len(), x.len(), das.apply_iq(&iq).unwrap());
    let envelope = beamformed.map(|v| v.norm());
    let (i, j) = argmax(&envelope);
    assert!((x[j] - 2e-3).abs() <= 5e-4, "x={}", x[j]);
    assert!((z[i] - 2.5e-2).abs() <= 5e-4, "z={}", z[i]);

    let image = bmode(&beamformed, 40.).unwrap();
    assert_eq!(image[(i, j)], 255);
    // far from the scatterer, the image is dark
    assert!(image[(0, 0)] < 200);
}

#[test]
fn param_file() {
    let param = getparam(Probe::C5_2v).tx_delay(vec![0.; 128]).checked().unwrap();
    let path = std::env::temp_dir().join("must-toolbox-param.pkl");
    param.to_pickle(&path).unwrap();
    let loaded = Param::from_pickle(&path).unwrap();
    assert_eq!(loaded, param);
    std::fs::remove_file(path).unwrap();
}

#[test]
fn probe_from_environment() {
    std::env::set_var(PROBE_ENV, "p4-2v");
    assert_eq!(default_probe().unwrap(), Probe::P4_2v);
    std::env::set_var(PROBE_ENV, "not-a-probe");
    assert!(default_probe().is_err());
    std::env::remove_var(PROBE_ENV);
    assert_eq!(default_probe().unwrap(), Probe::L11_5v);
}
