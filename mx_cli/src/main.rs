//! CLI demo for the matrix expression graph library.
//!
//! Builds a few expressions, runs primal, forward and adjoint sweeps over
//! them and validates the adjoint against finite differences.
//!
//! Usage:
//!   mx [--guard G] [--tolerance T] [--permissive] [--eps E] [--check-tol C] [-v]

use std::process;

use clap::Parser;
use log::{debug, info};

use mx_core::{finite_diff_grad, max_grad_error, EvalPlan, Graph, GraphOptions, Mx, Shape};

/// Matrix expression graph demo
///
/// Evaluates concatenation and conditional nodes together with their
/// forward and adjoint sensitivities.
#[derive(Parser, Debug)]
#[command(name = "mx")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Guard value for the conditional example
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    guard: f64,

    /// Guard tolerance used by conditional nodes
    #[arg(long, default_value_t = mx_core::DEFAULT_IF_TOLERANCE)]
    tolerance: f64,

    /// Log stale-buffer violations instead of failing on them
    #[arg(long)]
    permissive: bool,

    /// Finite difference step
    #[arg(long, default_value_t = 1e-7)]
    eps: f64,

    /// Maximum accepted |adjoint - finite difference|
    #[arg(long, default_value_t = 1e-5)]
    check_tol: f64,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn graph_options(&self) -> GraphOptions {
        let options = GraphOptions::default().with_if_tolerance(self.tolerance);
        if self.permissive {
            options.permissive()
        } else {
            options
        }
    }
}

fn main() {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
    debug!("{:?}", args);

    match run(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

/// Runs every example. Returns whether the finite difference check passed.
fn run(args: &Args) -> mx_core::Result<bool> {
    println!("=== Matrix Expression Graph Demo ===\n");
    concat_example(args)?;
    conditional_example(args)?;
    finite_difference_check(args)
}

/// Format a column-major buffer as rows.
fn format_matrix(values: &[f64], shape: Shape) -> String {
    let rows: Vec<String> = (0..shape.rows())
        .map(|i| {
            let row: Vec<String> = (0..shape.cols())
                .map(|j| format!("{}", values[shape.index(i, j)]))
                .collect();
            format!("[{}]", row.join(", "))
        })
        .collect();
    format!("[{}]", rows.join(", "))
}

fn concat_example(args: &Args) -> mx_core::Result<()> {
    println!("1. Horizontal concatenation: H = [A, B]");
    let mut g = Graph::with_options(args.graph_options());
    let a = g.symbol("A", (2, 1));
    let b = g.symbol("B", (2, 2));
    let h = g.horzcat(&[a, b])?;
    g.set_value(a, &[1.0, 2.0])?;
    g.set_value(b, &[3.0, 4.0, 5.0, 6.0])?;
    let shape = g.shape(h)?;

    let plan = EvalPlan::new(&g, &[h])?;
    let value = plan.primal(&mut g)?.remove(0);
    println!("   A = {}", format_matrix(g.value(a)?, g.shape(a)?));
    println!("   B = {}", format_matrix(g.value(b)?, g.shape(b)?));
    println!("   {} = {}", g.render(h)?, format_matrix(&value, shape));

    let tangent = plan.forward(&mut g, &[(a, &[1.0, 0.0])])?.remove(0);
    println!("   dA = [[1], [0]]  ->  dH = {}", format_matrix(&tangent, shape));

    let cot = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
    let sens = plan.adjoint(&mut g, &[(h, &cot)])?;
    println!("   cotangent {}", format_matrix(&cot, shape));
    if let (Some(da), Some(db)) = (sens.wrt(&a), sens.wrt(&b)) {
        println!("   adj A = {}", format_matrix(da, g.shape(a)?));
        println!("   adj B = {}\n", format_matrix(db, g.shape(b)?));
    }
    Ok(())
}

fn conditional_example(args: &Args) -> mx_core::Result<()> {
    println!("2. Conditional: C = if_else_zero(g, sin(x))");
    let mut g = Graph::with_options(args.graph_options());
    let guard = g.scalar_symbol("g");
    let x = g.symbol("x", (2, 1));
    let sx = g.sin(x)?;
    let c = g.if_else_zero(guard, sx)?;
    g.set_value(x, &[0.5, 1.0])?;
    g.set_value(guard, &[args.guard])?;

    let plan = EvalPlan::new(&g, &[c])?;
    let value = plan.primal(&mut g)?.remove(0);
    let branch = if args.guard > args.tolerance {
        "true branch"
    } else {
        "zero"
    };
    info!("guard {} against tolerance {}", args.guard, args.tolerance);
    println!(
        "   g = {}, tolerance = {:e}  ->  {}",
        args.guard, args.tolerance, branch
    );
    println!("   C = {}", format_matrix(&value, g.shape(c)?));

    let sens = plan.adjoint(&mut g, &[(c, &[1.0, 1.0])])?;
    if let Some(dx) = sens.wrt(&x) {
        println!("   adj x = {}", format_matrix(dx, g.shape(x)?));
    }
    if let Some(dg) = sens.wrt(&guard) {
        println!("   adj g = {} (the guard carries no sensitivity)\n", dg[0]);
    }
    Ok(())
}

/// z = sum(sin(A * b) ./ (b .* b + 1)), A 2x2 and b 2x1.
fn build_composite(g: &mut Graph) -> mx_core::Result<(Mx, Mx, Mx)> {
    let a = g.symbol("A", (2, 2));
    let b = g.symbol("b", (2, 1));
    let ab = g.matmul(a, b)?;
    let s = g.sin(ab)?;
    let bb = g.mul(b, b)?;
    let one = g.constant(vec![1.0, 1.0], (2, 1))?;
    let den = g.add(bb, one)?;
    let q = g.div(s, den)?;
    let z = g.sum(q)?;
    Ok((a, b, z))
}

fn composite_value(point: &[f64], options: GraphOptions) -> mx_core::Result<f64> {
    let mut g = Graph::with_options(options);
    let (a, b, z) = build_composite(&mut g)?;
    g.set_value(a, &point[..4])?;
    g.set_value(b, &point[4..])?;
    let plan = EvalPlan::new(&g, &[z])?;
    Ok(plan.primal(&mut g)?[0][0])
}

fn finite_difference_check(args: &Args) -> mx_core::Result<bool> {
    println!("3. Composite: z = sum(sin(A * b) ./ (b .* b + 1))");
    let point = [0.3, -1.2, 0.8, 0.5, 1.5, -0.7];
    let options = args.graph_options();

    let mut g = Graph::with_options(options);
    let (a, b, z) = build_composite(&mut g)?;
    g.set_value(a, &point[..4])?;
    g.set_value(b, &point[4..])?;
    let plan = EvalPlan::new(&g, &[z])?;
    let value = plan.primal(&mut g)?[0][0];
    println!("   {} = {:.10}", g.render(z)?, value);

    let sens = plan.adjoint(&mut g, &[(z, &[1.0])])?;
    let mut adjoint = Vec::with_capacity(point.len());
    for x in [a, b] {
        if let Some(s) = sens.wrt(&x) {
            adjoint.extend_from_slice(s);
        }
    }

    // The closure cannot return an error, so a failure shows up as NaN.
    let fd = finite_diff_grad(
        |p| composite_value(p, options).unwrap_or(f64::NAN),
        &point,
        args.eps,
    );

    println!("   {:>6} {:>16} {:>16}", "entry", "adjoint", "finite diff");
    for (k, (ad, f)) in adjoint.iter().zip(&fd).enumerate() {
        println!("   {:>6} {:>16.10} {:>16.10}", k, ad, f);
    }

    let max_err = max_grad_error(&adjoint, &fd);
    println!("   Max absolute error: {:.2e}\n", max_err);
    if max_err < args.check_tol {
        println!(
            "PASS: Max error ({:.2e}) < tolerance ({:.2e})",
            max_err, args.check_tol
        );
        Ok(true)
    } else {
        println!(
            "FAIL: Max error ({:.2e}) >= tolerance ({:.2e})",
            max_err, args.check_tol
        );
        Ok(false)
    }
}
