//! End-to-end walkthrough: create tensors, inspect them, move them between
//! devices, slice, multiply, mutate in place and share memory with external
//! array buffers.

use tessera_core::prelude::*;
use tessera_core::{device, DeviceConfig, ErrorKind, NestedData, Scalar, StorageOrigin};

/// One emulated accelerator; the probe makes it the default target.
fn setup() -> Device {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let config = DeviceConfig {
        cuda_devices: 1,
        mps_devices: 0,
        default_device: None,
        seed: Some(7),
    };
    device::init(config).expect("device configuration")
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).abs() < tol, "element {i} differs: {x} vs {y} (tol={tol})");
    }
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn test_probe_selects_accelerator() {
    let target = setup();
    assert_eq!(target, Device::Cuda(0));
    assert_eq!(device::default_device(), Device::Cuda(0));
    assert_eq!(device::available_devices(), &[Device::Cuda(0), Device::Cpu]);
    assert!(!device::is_available(Device::Mps(0)));
}

#[test]
fn test_from_data_and_external_round_trip() {
    setup();
    let t = Tensor::from_data(nested![[1, 2], [3, 4]]).unwrap();
    let n = t.to_external().unwrap();
    let back = Tensor::from_external(&n).unwrap();
    assert_eq!(back.dims(), t.dims());
    assert_eq!(back.to_vec::<i64>().unwrap(), t.to_vec::<i64>().unwrap());

    let fresh = ExternalBuffer::from_vec(vec![1.5f64, 2.5, 3.5], [3]).unwrap();
    let imported = Tensor::from_external(&fresh).unwrap();
    assert_eq!(imported.storage().origin(), StorageOrigin::External);
    assert_eq!(imported.to_external().unwrap().to_vec::<f64>().unwrap(), vec![1.5, 2.5, 3.5]);
}

/// Literal -> tensor -> external handle -> tensor reproduces every leaf.
fn assert_external_round_trip(data: NestedData, dtype: DType) {
    let expected: Vec<f64> = data.flatten().into_iter().map(Scalar::to_f64).collect();
    let shape = data.infer_shape().unwrap();
    let t = Tensor::from_data(data).unwrap();
    assert_eq!(t.dtype(), dtype);
    assert_eq!(t.shape(), &shape);

    let n = t.to_external().unwrap();
    assert_eq!(n.dtype(), dtype);
    assert_eq!(n.shape(), &shape);
    let back = Tensor::from_external(&n).unwrap();
    assert_eq!(back.shape(), &shape);
    assert_eq!(back.dtype(), dtype);
    assert_eq!(back.to_f64_vec(), expected);
}

#[test]
fn test_external_round_trip_literals() {
    setup();
    assert_external_round_trip(nested![[1, 2], [3, 4]], DType::I64);
    assert_external_round_trip(nested![[0.25, -1.5, 2.5], [8.0, 0.0, -0.125]], DType::F32);
    assert_external_round_trip(nested![[1, 2.5], [-3, 4]], DType::F32);
    assert_external_round_trip(nested![[[1, 2], [3, 4]], [[5, 6], [7, 8]]], DType::I64);
    assert_external_round_trip(NestedData::from(3.5f64), DType::F32);
    assert_external_round_trip(NestedData::from(-7i64), DType::I64);
    assert_external_round_trip(nested![], DType::F32);
}

#[test]
fn test_round_trip_keeps_native_values() {
    setup();
    let big = nested![[i64::MAX, i64::MIN], [1i64 << 53, (1i64 << 53) + 1]];
    let t = Tensor::from_data(big).unwrap();
    let back = Tensor::from_external(&t.to_external().unwrap()).unwrap();
    assert_eq!(
        back.to_vec::<i64>().unwrap(),
        vec![i64::MAX, i64::MIN, 1i64 << 53, (1i64 << 53) + 1]
    );

    let mixed = Tensor::from_data(nested![[1, 2.5], [-3, 4]]).unwrap();
    let back = Tensor::from_external(&mixed.to_external().unwrap()).unwrap();
    assert_eq!(back.to_vec::<f32>().unwrap(), vec![1.0, 2.5, -3.0, 4.0]);
}

#[test]
fn test_like_constructors() {
    setup();
    let x = Tensor::from_data(nested![[1, 2], [3, 4]]).unwrap();
    let ones = Tensor::ones_like(&x).unwrap();
    assert_eq!(ones.to_vec::<i64>().unwrap(), vec![1, 1, 1, 1]);
    let rand = Tensor::rand_like(&x, Some(DType::F32)).unwrap();
    assert_eq!(rand.dims(), &[2, 2]);
    assert!(rand.to_f64_vec().iter().all(|&v| (0.0..1.0).contains(&v)));
}

#[test]
fn test_attributes() {
    setup();
    let t = Tensor::rand([3, 4], DType::F32).unwrap();
    assert_eq!(t.shape(), &Shape::new(&[3, 4]));
    assert_eq!(t.dtype(), DType::F32);
    assert_eq!(t.device(), Device::Cpu);
}

// ============================================================================
// Placement
// ============================================================================

#[test]
fn test_move_to_default_device() {
    let target = setup();
    let t = Tensor::ones([4, 4], DType::F32);
    let moved = t.to(target).unwrap();
    assert_eq!(moved.device(), target);
    assert!(!moved.shares_storage(&t));

    // Writes on the device copy do not reach the host tensor.
    moved.fill_(3.0).unwrap();
    assert!(t.to_vec::<f32>().unwrap().iter().all(|&v| v == 1.0));

    let again = moved.to(target).unwrap();
    assert!(again.shares_storage(&moved));
}

#[test]
fn test_device_mismatch_leaves_operands() {
    let target = setup();
    let a = Tensor::ones([2, 2], DType::F32);
    let b = Tensor::ones([2, 2], DType::F32).to(target).unwrap();
    let err = a.mul(&b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceMismatch);
    assert!(a.add_(&b).is_err());
    assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0; 4]);
    assert_eq!(b.to_vec::<f32>().unwrap(), vec![1.0; 4]);
}

// ============================================================================
// Indexing, joining, arithmetic
// ============================================================================

#[test]
fn test_indexing_walkthrough() {
    setup();
    let t = Tensor::ones([4, 4], DType::F32);
    assert_eq!(t.index(0).unwrap().to_vec::<f32>().unwrap(), vec![1.0; 4]);
    assert_eq!(t.slice(&s![.., 0]).unwrap().dims(), &[4]);
    assert_eq!(t.slice(&s![..., -1]).unwrap().dims(), &[4]);

    t.assign(&s![.., 1], 0.0).unwrap();
    let data = t.to_vec::<f32>().unwrap();
    for (i, v) in data.iter().enumerate() {
        assert_eq!(*v, if i % 4 == 1 { 0.0 } else { 1.0 });
    }
}

#[test]
fn test_concat_shapes() {
    setup();
    let t = Tensor::ones([4, 4], DType::F32);
    let t1 = Tensor::cat(&[&t, &t, &t], 1).unwrap();
    assert_eq!(t1.dims(), &[4, 12]);

    let a = Tensor::from_data(nested![[1, 2, 3], [4, 5, 6]]).unwrap();
    let b = Tensor::from_data(nested![[7, 8, 9], [10, 11, 12]]).unwrap();
    assert_eq!(Tensor::concat(&[&a, &b], 1).unwrap().dims(), &[2, 6]);
    assert_eq!(Tensor::concat(&[&a, &b], 0).unwrap().dims(), &[4, 3]);
}

#[test]
fn test_arithmetic_walkthrough() {
    setup();
    let tensor = Tensor::ones([4, 4], DType::F32);
    tensor.assign(&s![.., 1], 0.0).unwrap();

    let y1 = tensor.matmul(&tensor.t().unwrap()).unwrap();
    assert_eq!(y1.dims(), &[4, 4]);
    assert!(y1.to_vec::<f32>().unwrap().iter().all(|&v| v == 3.0));

    // Write a product into an existing tensor.
    let y3 = Tensor::rand_like(&y1, None).unwrap();
    y3.copy_(&tensor.matmul(&tensor.t().unwrap()).unwrap()).unwrap();
    assert_eq!(y3.to_vec::<f32>().unwrap(), y1.to_vec::<f32>().unwrap());

    let z1 = &tensor * &tensor;
    assert_eq!(z1.to_vec::<f32>().unwrap(), tensor.to_vec::<f32>().unwrap());

    let agg = tensor.sum().unwrap();
    assert_eq!(agg.item().unwrap(), 12.0);
}

#[test]
fn test_in_place_add() {
    setup();
    let tensor = Tensor::ones([4, 4], DType::F32);
    tensor.assign(&s![.., 1], 0.0).unwrap();
    tensor.add_scalar_(5.0).unwrap();
    for r in 0..4 {
        for c in 0..4 {
            let expected = if c == 1 { 5.0 } else { 6.0 };
            assert_eq!(tensor.get(&[r, c]).unwrap(), expected);
        }
    }
}

// ============================================================================
// Bridge with external arrays
// ============================================================================

#[test]
fn test_tensor_to_external_shares_memory() {
    setup();
    let t = Tensor::ones([5], DType::F32);
    let n = t.to_external().unwrap();
    t.add_scalar_(1.0).unwrap();
    assert_eq!(n.to_vec::<f32>().unwrap(), vec![2.0; 5]);
}

#[test]
fn test_external_to_tensor_shares_memory() {
    setup();
    let n = ExternalBuffer::from_vec(vec![1.0f64; 5], [5]).unwrap();
    let t = Tensor::from_external(&n).unwrap();
    n.add_scalar(1.0).unwrap();
    assert_eq!(t.to_vec::<f64>().unwrap(), vec![2.0; 5]);
    assert_close(
        &t.to_dtype(DType::F32).unwrap().to_vec::<f32>().unwrap(),
        &[2.0; 5],
        1e-6,
    );
}

#[test]
fn test_accelerator_results_match_host() {
    let target = setup();
    let a = Tensor::rand([16, 32], DType::F32).unwrap();
    let b = Tensor::rand([32, 8], DType::F32).unwrap();
    let host = a.matmul(&b).unwrap().add_scalar(1.0).unwrap();
    let dev = a
        .to(target)
        .unwrap()
        .matmul(&b.to(target).unwrap())
        .unwrap()
        .add_scalar(1.0)
        .unwrap();
    assert_eq!(dev.kernels_name(), "accelerator");
    assert_close(
        &host.to_vec::<f32>().unwrap(),
        &dev.cpu().unwrap().to_vec::<f32>().unwrap(),
        f32::EPSILON,
    );
}
