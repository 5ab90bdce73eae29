// build.rs
use std::{env, path::PathBuf, process::Command};

fn main() {
    // The CUDA kernels are only compiled when the `cuda` feature is enabled,
    // so the default (CPU-only) build needs neither nvcc nor a CUDA toolkit.
    if env::var_os("CARGO_FEATURE_CUDA").is_none() {
        return;
    }

    println!("cargo:rerun-if-changed=kernels/dtw_kernel.cu");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let ptx_path = out_dir.join("dtw_kernel.ptx");

    let nvcc = env::var("NVCC").unwrap_or_else(|_| "nvcc".to_string());
    let status = Command::new(&nvcc)
        .args(["--ptx", "-O3", "-lineinfo", "kernels/dtw_kernel.cu", "-o"])
        .arg(&ptx_path)
        .status()
        .expect("Failed to spawn nvcc; is the CUDA toolkit on PATH? (set NVCC to override)");

    if !status.success() {
        panic!("nvcc failed to compile kernels/dtw_kernel.cu to PTX");
    }
}
