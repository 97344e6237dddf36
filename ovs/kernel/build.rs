/// Exposes the architecture the probes read `pt_regs` for as
/// `cfg(bpf_target_arch = "...")`. The target itself is always bpfel, so the
/// host architecture is used unless `CARGO_CFG_BPF_TARGET_ARCH` says otherwise.
fn main() {
    println!("cargo::rustc-check-cfg=cfg(bpf_target_arch, values(\"x86_64\", \"aarch64\"))");
    println!("cargo:rerun-if-env-changed=CARGO_CFG_BPF_TARGET_ARCH");

    let arch = match std::env::var("CARGO_CFG_BPF_TARGET_ARCH") {
        Ok(arch) => arch,
        Err(_) => {
            let host = std::env::var("HOST").unwrap_or_default();
            host.split_once('-')
                .map(|(arch, _)| arch.to_string())
                .unwrap_or(host)
        }
    };

    match arch.as_str() {
        "x86_64" | "aarch64" => println!("cargo::rustc-cfg=bpf_target_arch=\"{arch}\""),
        other => panic!("Unsupported architecture {other}. We only support aarch64 and x86_64, for now."),
    }
}
