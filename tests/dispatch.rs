use std::panic::{self, AssertUnwindSafe};

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use memtile::alloc;
use memtile::backend::{self, Backend};
use memtile::descriptor::MemoryBuffer;
use memtile::ops::dispatch;
use memtile::{
    CubeWiseSumCache, Element, Error, LinearSystemSolverType, MathDomain, Matrix, MatrixOperation, MemorySpace, Tensor,
    Vector,
};

const N: MatrixOperation = MatrixOperation::None;
const T: MatrixOperation = MatrixOperation::Transpose;

fn add_case<E: Element>(space: MemorySpace) {
    let x = Vector::from_host(&[1.0, 2.0, 3.0, 4.0].map(E::from_f64), space).unwrap();
    let y = Vector::from_host(&[10.0, 20.0, 30.0, 40.0].map(E::from_f64), space).unwrap();
    let mut z = Vector::<E>::zeros(4, space).unwrap();

    z.add(&x, &y, E::from_f64(2.0)).unwrap();
    assert_eq!(z.get().unwrap(), [12.0, 24.0, 36.0, 48.0].map(E::from_f64).to_vec());

    z.add(&x, &y, E::ZERO).unwrap();
    assert_eq!(z.get().unwrap(), y.get().unwrap());

    let empty = Vector::<E>::new(0, space).unwrap();
    let mut out = Vector::<E>::new(0, space).unwrap();
    out.add(&empty, &empty, E::ONE).unwrap();
    assert!(out.get().unwrap().is_empty());
}

#[test]
fn test_reference_add_every_domain() {
    add_case::<i32>(MemorySpace::Test);
    add_case::<f32>(MemorySpace::Test);
    add_case::<f64>(MemorySpace::Test);
}

#[test]
fn test_cpu_add_every_domain() {
    add_case::<i32>(MemorySpace::Cpu);
    add_case::<f32>(MemorySpace::Cpu);
    add_case::<f64>(MemorySpace::Cpu);
}

#[test]
fn test_unbacked_spaces_are_unsupported() {
    for space in [MemorySpace::Device, MemorySpace::Mkl, MemorySpace::OpenBlas, MemorySpace::Null] {
        let err = Vector::<f64>::new(4, space).unwrap_err();
        assert!(err.is_unsupported(), "{space}: {err}");
        assert_eq!(
            err,
            Error::Unsupported {
                operation: "alloc",
                space,
                domain: MathDomain::Float64
            }
        );
    }
}

#[test]
fn test_real_only_operations_reject_int32() {
    let v = Vector::from_host(&[3, 4], MemorySpace::Test).unwrap();
    assert_eq!(v.sum().unwrap(), 7);
    // SAFETY: `v` outlives the call.
    let err = unsafe { dispatch::euclidean_norm(&v.descriptor()) }.unwrap_err();
    assert_eq!(
        err,
        Error::Unsupported {
            operation: "euclidean_norm",
            space: MemorySpace::Test,
            domain: MathDomain::Int32
        }
    );
}

#[test]
fn test_column_wise_arg_abs_is_one_based() {
    for space in [MemorySpace::Test, MemorySpace::Cpu] {
        let a = Matrix::from_host(3, 1, &[-0.2f64, 0.9, -0.05], space).unwrap();
        assert_eq!(a.column_wise_arg_abs_max().unwrap().get().unwrap(), vec![2]);
        assert_eq!(a.column_wise_arg_abs_min().unwrap().get().unwrap(), vec![3]);
        assert_eq!(a.as_vector().arg_abs_max().unwrap(), 1);
        assert_eq!(a.as_vector().arg_abs_min().unwrap(), 2);
    }
}

#[test]
fn test_mixing_spaces_panics() {
    let x = Vector::<f32>::zeros(3, MemorySpace::Test).unwrap();
    let y = Vector::<f32>::zeros(3, MemorySpace::Cpu).unwrap();
    let mut z = Vector::<f32>::zeros(3, MemorySpace::Test).unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| z.add(&x, &y, 1.0)));
    assert!(result.is_err());
}

#[test]
fn test_mismatched_sizes_panic() {
    let x = Vector::<f64>::zeros(3, MemorySpace::Cpu).unwrap();
    let mut z = Vector::<f64>::zeros(4, MemorySpace::Cpu).unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| z.add_equal(&x, 1.0)));
    assert!(result.is_err());
}

struct Failing;

impl Backend for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    unsafe fn alloc(&self, buffer: &mut MemoryBuffer) -> memtile::Result<()> {
        alloc::generic_alloc(buffer);
        Ok(())
    }

    unsafe fn free(&self, buffer: &mut MemoryBuffer) -> memtile::Result<()> {
        alloc::generic_free(buffer);
        Ok(())
    }

    unsafe fn scale(&self, _: &MemoryBuffer, _: f64) -> memtile::Result<()> {
        Err(Error::Backend {
            backend: self.name(),
            operation: "cublasSscal",
            code: 13,
        })
    }
}

static FAILING: Failing = Failing;

#[test]
fn test_installed_backend_preserves_status_codes() {
    assert!(!backend::is_available(MemorySpace::Host));
    backend::install(MemorySpace::Host, &FAILING);

    let before = alloc::stats().outstanding();
    {
        let mut v = Vector::<f32>::new(4, MemorySpace::Host).unwrap();
        let err = v.scale(2.0).unwrap_err();
        assert_eq!(err.code(), Some(13));
        assert_eq!(
            err,
            Error::Backend {
                backend: "failing",
                operation: "cublasSscal",
                code: 13
            }
        );

        let err = v.sum().unwrap_err();
        assert!(err.is_unsupported());
    }
    assert_eq!(alloc::stats().outstanding(), before);

    assert!(backend::uninstall(MemorySpace::Host).is_some());
    assert!(Vector::<f32>::new(4, MemorySpace::Host).unwrap_err().is_unsupported());
}

fn operands(space: MemorySpace) -> (Matrix<f64>, Matrix<f64>) {
    let b: Vec<f64> = (0..12).map(|i| f64::from(i) * 0.5 - 2.0).collect();
    let c: Vec<f64> = (0..12).map(|i| f64::from(i % 5) + 1.0).collect();
    (
        Matrix::from_host(3, 4, &b, space).unwrap(),
        Matrix::from_host(4, 3, &c, space).unwrap(),
    )
}

#[test]
fn test_reference_sub_multiply_rejects_transposes() {
    let (b, c) = operands(MemorySpace::Test);
    let mut a = Matrix::<f64>::zeros(3, 3, MemorySpace::Test).unwrap();
    a.sub_multiply(&b, &c, 2, 2, 2, N, N, 1.0, 0.0).unwrap();

    let err = a.sub_multiply(&b, &b, 2, 2, 2, N, T, 1.0, 0.0).unwrap_err();
    assert_eq!(
        err,
        Error::Unsupported {
            operation: "sub_multiply",
            space: MemorySpace::Test,
            domain: MathDomain::Float64
        }
    );
}

#[test]
fn test_reference_batched_multiply_rejects_transposes() {
    let b = Tensor::<f32>::zeros(2, 2, 3, MemorySpace::Test).unwrap();
    let mut a = Tensor::<f32>::zeros(2, 2, 3, MemorySpace::Test).unwrap();
    a.batched_multiply(&b, &b, N, N, 1.0, 0.0).unwrap();
    assert!(a.batched_multiply(&b, &b, T, N, 1.0, 0.0).unwrap_err().is_unsupported());
}

#[test]
fn test_reference_solve_rejects_transposes() {
    let a = Matrix::from_host(2, 2, &[2.0f64, 0.0, 1.0, 3.0], MemorySpace::Test).unwrap();
    let mut b = Matrix::from_host(2, 1, &[1.0, 1.0], MemorySpace::Test).unwrap();
    let err = a.solve(&mut b, T, LinearSystemSolverType::Lu).unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn test_cpu_matches_reference_for_products() {
    let (tb, tc) = operands(MemorySpace::Test);
    let (cb, cc) = operands(MemorySpace::Cpu);
    let mut ta = Matrix::<f64>::filled(3, 3, 1.0, MemorySpace::Test).unwrap();
    let mut ca = Matrix::<f64>::filled(3, 3, 1.0, MemorySpace::Cpu).unwrap();
    ta.multiply(&tb, &tc, N, N, 0.5, 2.0).unwrap();
    ca.multiply(&cb, &cc, N, N, 0.5, 2.0).unwrap();
    for (r, c) in ta.get().unwrap().into_iter().zip(ca.get().unwrap()) {
        assert_relative_eq!(r, c, epsilon = 1e-12);
    }

    let mut ty = Vector::<f64>::zeros(4, MemorySpace::Test).unwrap();
    let mut cy = Vector::<f64>::zeros(4, MemorySpace::Cpu).unwrap();
    ty.dot(&tb, &tc.column(0).view(0, 3), T, 1.0, 0.0).unwrap();
    cy.dot(&cb, &cc.column(0).view(0, 3), T, 1.0, 0.0).unwrap();
    for (r, c) in ty.get().unwrap().into_iter().zip(cy.get().unwrap()) {
        assert_relative_eq!(r, c, epsilon = 1e-12);
    }
}

fn random_pair(rows: usize, cols: usize, rng: &mut StdRng) -> (Matrix<f64>, Matrix<f64>) {
    let values: Vec<f64> = (0..rows * cols).map(|_| rng.random_range(-1.0..1.0)).collect();
    (
        Matrix::from_host(rows, cols, &values, MemorySpace::Test).unwrap(),
        Matrix::from_host(rows, cols, &values, MemorySpace::Cpu).unwrap(),
    )
}

#[test]
fn test_cpu_matches_reference_on_random_inputs() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (tb, cb) = random_pair(64, 48, &mut rng);
    let (tc, cc) = random_pair(32, 48, &mut rng);

    let mut ta = Matrix::<f64>::zeros(64, 32, MemorySpace::Test).unwrap();
    let mut ca = Matrix::<f64>::zeros(64, 32, MemorySpace::Cpu).unwrap();
    ta.multiply(&tb, &tc, N, T, 1.0, 0.0).unwrap();
    ca.multiply(&cb, &cc, N, T, 1.0, 0.0).unwrap();
    for (r, c) in ta.get().unwrap().into_iter().zip(ca.get().unwrap()) {
        assert_relative_eq!(r, c, epsilon = 1e-12);
    }

    let (tv, cv) = random_pair(10_000, 1, &mut rng);
    assert_relative_eq!(
        tv.as_vector().sum().unwrap(),
        cv.as_vector().sum().unwrap(),
        epsilon = 1e-9
    );
    assert_relative_eq!(
        tv.as_vector().euclidean_norm().unwrap(),
        cv.as_vector().euclidean_norm().unwrap(),
        epsilon = 1e-9
    );
    assert_eq!(
        tv.as_vector().arg_abs_max().unwrap(),
        cv.as_vector().arg_abs_max().unwrap()
    );
}

#[test]
fn test_cpu_honours_transposes_the_reference_rejects() {
    let (b, _) = operands(MemorySpace::Cpu);
    let mut a = Matrix::<f64>::zeros(2, 2, MemorySpace::Cpu).unwrap();
    a.sub_multiply(&b, &b, 2, 3, 2, N, T, 1.0, 0.0).unwrap();

    let host = b.get().unwrap();
    let at = |i: usize, j: usize| host[i + 3 * j];
    let expected: Vec<f64> = (0..2)
        .flat_map(|j| (0..2).map(move |i| (i, j)))
        .map(|(i, j)| (0..3).map(|k| at(i, k) * at(j, k)).sum())
        .collect();
    for (g, e) in a.get().unwrap().into_iter().zip(expected) {
        assert_relative_eq!(g, e, epsilon = 1e-12);
    }
}

#[test]
fn test_solve_leaves_the_matrix_untouched() {
    let values = [4.0f64, 1.0, 0.5, 2.0, 5.0, 1.0, 0.0, 1.0, 3.0];
    for space in [MemorySpace::Test, MemorySpace::Cpu] {
        for solver in [LinearSystemSolverType::Lu, LinearSystemSolverType::Qr] {
            let a = Matrix::from_host(3, 3, &values, space).unwrap();
            let x = Matrix::from_host(3, 1, &[1.0, -2.0, 0.5], space).unwrap();
            let mut b = Matrix::<f64>::zeros(3, 1, space).unwrap();
            b.multiply(&a, &x, N, N, 1.0, 0.0).unwrap();

            a.solve(&mut b, N, solver).unwrap();
            assert_eq!(a.get().unwrap(), values.to_vec());
            for (g, e) in b.get().unwrap().into_iter().zip(x.get().unwrap()) {
                assert_relative_eq!(g, e, epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn test_singular_solve_reports_backend_status() {
    let a = Matrix::from_host(2, 2, &[1.0f64, 2.0, 2.0, 4.0], MemorySpace::Test).unwrap();
    let mut b = Matrix::<f64>::filled(2, 1, 1.0, MemorySpace::Test).unwrap();
    let err = a.solve(&mut b, N, LinearSystemSolverType::Lu).unwrap_err();
    assert!(matches!(
        err,
        Error::Backend {
            backend: "reference",
            operation: "getrf",
            ..
        }
    ));
    assert!(err.code().is_some_and(|code| code > 0));
}

#[test]
fn test_no_scratch_leaks_across_composite_operations() {
    let before = alloc::stats().outstanding();
    {
        let a = Matrix::from_host(2, 3, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], MemorySpace::Cpu).unwrap();
        assert_eq!(a.row_wise_sum().unwrap().get().unwrap(), vec![9.0, 12.0]);

        let mut m = Matrix::from_host(2, 2, &[2.0f32, 0.0, 0.0, 4.0], MemorySpace::Cpu).unwrap();
        m.invert(N, LinearSystemSolverType::Qr).unwrap();
        for (g, e) in m.get().unwrap().into_iter().zip([0.5, 0.0, 0.0, 0.25]) {
            assert_relative_eq!(g, e, epsilon = 1e-6);
        }
    }
    assert_eq!(alloc::stats().outstanding(), before);
}

#[test]
fn test_cube_wise_sum_on_cpu() {
    let values: Vec<f32> = (0..24).map(|i| i as f32).collect();
    let t = Tensor::from_host(2, 3, 4, &values, MemorySpace::Cpu).unwrap();
    let mut out = Matrix::<f32>::zeros(2, 3, MemorySpace::Cpu).unwrap();
    let mut cache = CubeWiseSumCache::default();
    t.cube_wise_sum(&mut out, &mut cache).unwrap();
    let expected: Vec<f32> = (0..6).map(|i| (0..4).map(|k| (i + 6 * k) as f32).sum()).collect();
    assert_eq!(out.get().unwrap(), expected);
}

#[test]
fn test_int32_arithmetic_wraps_on_overflow() {
    for space in [MemorySpace::Test, MemorySpace::Cpu] {
        let x = Vector::from_host(&[1, i32::MAX], space).unwrap();
        let y = Vector::from_host(&[i32::MAX, -1], space).unwrap();
        let mut z = Vector::<i32>::zeros(2, space).unwrap();

        z.add(&x, &y, 1).unwrap();
        assert_eq!(z.get().unwrap(), vec![i32::MIN, i32::MAX - 1], "{space}");

        z.elementwise_product(&x, &y, 2).unwrap();
        assert_eq!(z.get().unwrap(), vec![i32::MAX.wrapping_mul(2), i32::MAX.wrapping_mul(-2)]);

        z.scale(2).unwrap();
        assert_eq!(z.get().unwrap(), vec![-4, 4]);

        let a = Matrix::from_host(1, 2, &[i32::MAX, i32::MAX], space).unwrap();
        let b = Matrix::from_host(2, 1, &[1, 1], space).unwrap();
        let mut c = Matrix::<i32>::zeros(1, 1, space).unwrap();
        c.multiply(&a, &b, N, N, 1, 0).unwrap();
        assert_eq!(c.get().unwrap(), vec![-2]);
    }
}

#[test]
fn test_add_broadcast_both_orientations() {
    for space in [MemorySpace::Test, MemorySpace::Cpu] {
        let mut a = Matrix::from_host(2, 3, &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], space).unwrap();
        let across = Vector::from_host(&[10.0, 20.0, 30.0], space).unwrap();
        a.add_broadcast(&across, true, 1.0).unwrap();
        assert_eq!(a.get().unwrap(), vec![11.0, 12.0, 23.0, 24.0, 35.0, 36.0], "{space}");

        let mut b = Matrix::from_host(2, 3, &[1, 2, 3, 4, 5, 6], space).unwrap();
        let down = Vector::from_host(&[10, 20], space).unwrap();
        b.add_broadcast(&down, false, 2).unwrap();
        assert_eq!(b.get().unwrap(), vec![21, 42, 23, 44, 25, 46], "{space}");
    }
}

#[test]
fn test_scale_columns_and_division() {
    for space in [MemorySpace::Test, MemorySpace::Cpu] {
        let mut a = Matrix::from_host(2, 3, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], space).unwrap();
        let s = Vector::from_host(&[1.0, 0.0, -2.0], space).unwrap();
        a.scale_columns(&s).unwrap();
        assert_eq!(a.get().unwrap(), vec![1.0, 2.0, 0.0, 0.0, -10.0, -12.0], "{space}");

        let x = Vector::from_host(&[2.0f64, 12.0], space).unwrap();
        let y = Vector::from_host(&[4.0, 4.0], space).unwrap();
        let mut z = Vector::<f64>::zeros(2, space).unwrap();
        z.elementwise_division(&x, &y, 2.0).unwrap();
        assert_eq!(z.get().unwrap(), vec![1.0, 6.0], "{space}");
    }
}

#[test]
fn test_random_fills_are_seeded_and_bounded() {
    let reference = Vector::<f64>::random_uniform(1000, 42, MemorySpace::Test).unwrap().get().unwrap();
    assert!(reference.iter().all(|v| (0.0..1.0).contains(v)));

    let cpu = Vector::<f64>::random_uniform(1000, 42, MemorySpace::Cpu).unwrap().get().unwrap();
    assert_eq!(cpu, reference);
    let other = Vector::<f64>::random_uniform(1000, 43, MemorySpace::Test).unwrap().get().unwrap();
    assert_ne!(other, reference);

    let m = Matrix::<f32>::random_uniform(8, 4, 7, MemorySpace::Cpu).unwrap();
    assert!(m.get().unwrap().iter().all(|v| (0.0..=1.0).contains(v)));

    let normal = Vector::<f64>::random_gaussian(10_000, 3, MemorySpace::Cpu).unwrap().get().unwrap();
    let mean = normal.iter().sum::<f64>() / normal.len() as f64;
    let variance = normal.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / normal.len() as f64;
    assert!(mean.abs() < 0.05, "mean {mean}");
    assert!((0.9..1.1).contains(&variance), "variance {variance}");
    assert_eq!(
        Vector::<f64>::random_gaussian(16, 3, MemorySpace::Test).unwrap().get().unwrap(),
        normal[..16].to_vec()
    );
}

#[test]
fn test_random_fills_reject_int32() {
    for space in [MemorySpace::Test, MemorySpace::Cpu] {
        let v = Vector::<i32>::new(4, space).unwrap();
        let uniform = unsafe { dispatch::random_uniform(&v.descriptor(), 1) }.unwrap_err();
        let gaussian = unsafe { dispatch::random_gaussian(&v.descriptor(), 1) }.unwrap_err();
        assert!(uniform.is_unsupported());
        assert!(gaussian.is_unsupported());
    }
}

#[test]
fn test_cpu_cumulative_row_sum_matches_reference() {
    let mut rng = StdRng::seed_from_u64(11);
    let values: Vec<i32> = (0..7 * 5).map(|_| rng.random_range(-50..50)).collect();
    let mut expected = values.clone();
    for j in 1..5 {
        for i in 0..7 {
            let left = expected[i + (j - 1) * 7];
            expected[i + j * 7] += left;
        }
    }
    for space in [MemorySpace::Test, MemorySpace::Cpu] {
        let mut a = Matrix::from_host(7, 5, &values, space).unwrap();
        a.cumulative_row_sum().unwrap();
        assert_eq!(a.get().unwrap(), expected, "{space}");
    }
}
