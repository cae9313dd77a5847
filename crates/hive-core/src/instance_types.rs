//! Host CPU detection and the instance-type catalog derived from it.
//!
//! At startup the daemon inspects `/proc/cpuinfo` (vendor, family, model,
//! feature flags, with a branded-string fallback for guests that hide model
//! numbers) and maps the detected microarchitecture generation to a curated
//! set of AWS-compatible instance families. A daemon only accepts launches
//! for types in its catalog.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read};

use serde::{Deserialize, Serialize};

/// Machine architectures Hive can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    X86_64,
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU vendors we can classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuVendor {
    Intel,
    Amd,
    Arm,
    Unknown,
}

/// What the host told us about its processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInfo {
    pub vendor: CpuVendor,
    pub family: u32,
    pub model: u32,
    pub brand: String,
    pub flags: BTreeSet<String>,
    pub architecture: Architecture,
}

/// Microarchitecture generations mapped to instance-family tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CpuGeneration {
    /// Pre-Skylake Intel / pre-Zen AMD: burstable types only.
    Legacy,
    /// Skylake-SP/Cascade Lake, Zen 1/2: the *5 families.
    Gen5,
    /// Ice Lake, Zen 3: the *6 families.
    Gen6,
    /// Sapphire Rapids and newer, Zen 4 and newer: the *7 families.
    Gen7,
}

impl CpuInfo {
    /// Detect the host CPU from `/proc/cpuinfo`.
    pub fn detect() -> std::io::Result<CpuInfo> {
        let file = std::fs::File::open("/proc/cpuinfo")?;
        let arch = if cfg!(target_arch = "aarch64") {
            Architecture::Arm64
        } else {
            Architecture::X86_64
        };
        Self::from_reader(file, arch)
    }

    /// Parse cpuinfo text. Split out for tests and for guests whose
    /// `/proc/cpuinfo` carries only a model name.
    pub fn from_reader<R: Read>(reader: R, architecture: Architecture) -> std::io::Result<CpuInfo> {
        let mut vendor = CpuVendor::Unknown;
        let mut family = 0u32;
        let mut model = 0u32;
        let mut brand = String::new();
        let mut flags = BTreeSet::new();

        for line in BufReader::new(reader).lines() {
            let line = line?;
            // cpuinfo repeats per core; the first block is enough.
            if line.is_empty() && vendor != CpuVendor::Unknown {
                break;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "vendor_id" => {
                    vendor = match value {
                        "GenuineIntel" => CpuVendor::Intel,
                        "AuthenticAMD" => CpuVendor::Amd,
                        _ => CpuVendor::Unknown,
                    };
                }
                // ARM cores report an implementer code instead of a vendor
                // string; 0x41 is Arm Ltd.
                "CPU implementer" => {
                    vendor = CpuVendor::Arm;
                }
                "cpu family" => family = value.parse().unwrap_or(0),
                "model" => model = value.parse().unwrap_or(0),
                "model name" if brand.is_empty() => brand = value.to_string(),
                "flags" | "Features" if flags.is_empty() => {
                    flags = value.split_whitespace().map(str::to_string).collect();
                }
                _ => {}
            }
        }

        if architecture == Architecture::Arm64 && vendor == CpuVendor::Unknown {
            vendor = CpuVendor::Arm;
        }

        Ok(CpuInfo {
            vendor,
            family,
            model,
            brand,
            flags,
            architecture,
        })
    }

    /// Classify the microarchitecture generation.
    ///
    /// Family/model numbers are authoritative; when a hypervisor masks them
    /// the branded string is consulted instead.
    pub fn generation(&self) -> CpuGeneration {
        match (self.vendor, self.architecture) {
            (_, Architecture::Arm64) | (CpuVendor::Arm, _) => {
                // Neoverse V-class cores get the *7g tier.
                if self.brand.contains("Neoverse-V") || self.flags.contains("sve") {
                    CpuGeneration::Gen7
                } else {
                    CpuGeneration::Gen6
                }
            }
            (CpuVendor::Intel, _) => match (self.family, self.model) {
                (6, m) if m >= 143 => CpuGeneration::Gen7,
                (6, m) if m >= 106 => CpuGeneration::Gen6,
                (6, m) if m >= 85 => CpuGeneration::Gen5,
                (6, 0) => self.generation_from_brand(),
                _ => CpuGeneration::Legacy,
            },
            (CpuVendor::Amd, _) => match self.family {
                f if f >= 25 => CpuGeneration::Gen7,
                23 => CpuGeneration::Gen5,
                0 => self.generation_from_brand(),
                _ => CpuGeneration::Legacy,
            },
            (CpuVendor::Unknown, _) => self.generation_from_brand(),
        }
    }

    /// Branded-string fallback for VMs that zero out family/model.
    fn generation_from_brand(&self) -> CpuGeneration {
        let brand = self.brand.to_ascii_lowercase();
        if brand.contains("sapphire") || brand.contains("emerald") || brand.contains("genoa") {
            CpuGeneration::Gen7
        } else if brand.contains("ice lake") || brand.contains("icelake") || brand.contains("milan")
        {
            CpuGeneration::Gen6
        } else if brand.contains("xeon") || brand.contains("epyc") {
            CpuGeneration::Gen5
        } else {
            CpuGeneration::Legacy
        }
    }
}

/// One entry in a daemon's advertised catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceTypeInfo {
    pub name: String,
    pub vcpu: u32,
    pub memory_gib: u32,
    pub architecture: Architecture,
}

/// (suffix, vcpus, memory multiplier over the family base).
const SIZES: &[(&str, u32, u32)] = &[
    ("large", 2, 1),
    ("xlarge", 4, 2),
    ("2xlarge", 8, 4),
    ("4xlarge", 16, 8),
];

/// Burstable sizes carry their own vcpu/memory points.
const BURSTABLE_SIZES: &[(&str, u32, u32)] = &[
    ("micro", 2, 1),
    ("small", 2, 2),
    ("medium", 2, 4),
    ("large", 2, 8),
    ("xlarge", 4, 16),
    ("2xlarge", 8, 32),
];

fn family(types: &mut Vec<InstanceTypeInfo>, name: &str, base_gib: u32, arch: Architecture) {
    for (suffix, vcpu, mult) in SIZES {
        types.push(InstanceTypeInfo {
            name: format!("{name}.{suffix}"),
            vcpu: *vcpu,
            memory_gib: base_gib * mult,
            architecture: arch,
        });
    }
}

fn burstable(types: &mut Vec<InstanceTypeInfo>, name: &str, arch: Architecture) {
    for (suffix, vcpu, gib) in BURSTABLE_SIZES {
        types.push(InstanceTypeInfo {
            name: format!("{name}.{suffix}"),
            vcpu: *vcpu,
            memory_gib: *gib,
            architecture: arch,
        });
    }
}

/// Build the catalog a host with this CPU advertises.
///
/// Families follow the vendor and generation: burstable plus the
/// general/compute/memory tiers the microarchitecture can honestly emulate.
pub fn catalog_for(cpu: &CpuInfo) -> Vec<InstanceTypeInfo> {
    let arch = cpu.architecture;
    let generation = cpu.generation();
    let mut types = Vec::new();

    match (cpu.vendor, arch) {
        (_, Architecture::Arm64) | (CpuVendor::Arm, _) => {
            burstable(&mut types, "t4g", Architecture::Arm64);
            family(&mut types, "m6g", 8, Architecture::Arm64);
            family(&mut types, "c6g", 4, Architecture::Arm64);
            family(&mut types, "r6g", 16, Architecture::Arm64);
            if generation >= CpuGeneration::Gen7 {
                family(&mut types, "m7g", 8, Architecture::Arm64);
                family(&mut types, "c7g", 4, Architecture::Arm64);
                family(&mut types, "r7g", 16, Architecture::Arm64);
            }
        }
        (CpuVendor::Amd, _) => {
            burstable(&mut types, "t3a", arch);
            if generation >= CpuGeneration::Gen5 {
                family(&mut types, "m5a", 8, arch);
                family(&mut types, "c5a", 4, arch);
                family(&mut types, "r5a", 16, arch);
            }
            if generation >= CpuGeneration::Gen7 {
                family(&mut types, "m6a", 8, arch);
                family(&mut types, "c6a", 4, arch);
                family(&mut types, "r6a", 16, arch);
            }
        }
        _ => {
            burstable(&mut types, "t3", arch);
            if generation >= CpuGeneration::Gen5 {
                family(&mut types, "m5", 8, arch);
                family(&mut types, "c5", 4, arch);
                family(&mut types, "r5", 16, arch);
            }
            if generation >= CpuGeneration::Gen6 {
                family(&mut types, "m6i", 8, arch);
                family(&mut types, "c6i", 4, arch);
                family(&mut types, "r6i", 16, arch);
            }
            if generation >= CpuGeneration::Gen7 {
                family(&mut types, "m7i", 8, arch);
                family(&mut types, "c7i", 4, arch);
                family(&mut types, "r7i", 16, arch);
            }
        }
    }

    types
}

/// Look up one type in a catalog.
pub fn find_type<'a>(
    catalog: &'a [InstanceTypeInfo],
    name: &str,
) -> Option<&'a InstanceTypeInfo> {
    catalog.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTEL_ICELAKE: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 106
model name\t: Intel(R) Xeon(R) Platinum 8375C CPU @ 2.90GHz
flags\t\t: fpu vme de pse avx512f
";

    const AMD_ZEN2: &str = "\
processor\t: 0
vendor_id\t: AuthenticAMD
cpu family\t: 23
model\t\t: 49
model name\t: AMD EPYC 7R32
flags\t\t: fpu vme de pse sse4a
";

    const ARM_NEOVERSE: &str = "\
processor\t: 0
BogoMIPS\t: 243.75
Features\t: fp asimd evtstrm aes sha1 sha2 crc32 atomics
CPU implementer\t: 0x41
CPU architecture: 8
CPU variant\t: 0x3
CPU part\t: 0xd0c
";

    const MASKED_VM: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 0
model name\t: Intel Xeon Processor (Ice Lake)
flags\t\t: fpu vme
";

    fn parse(text: &str, arch: Architecture) -> CpuInfo {
        CpuInfo::from_reader(text.as_bytes(), arch).unwrap()
    }

    #[test]
    fn detects_intel_ice_lake() {
        let cpu = parse(INTEL_ICELAKE, Architecture::X86_64);
        assert_eq!(cpu.vendor, CpuVendor::Intel);
        assert_eq!(cpu.family, 6);
        assert_eq!(cpu.model, 106);
        assert!(cpu.flags.contains("avx512f"));
        assert_eq!(cpu.generation(), CpuGeneration::Gen6);
    }

    #[test]
    fn detects_amd_zen2() {
        let cpu = parse(AMD_ZEN2, Architecture::X86_64);
        assert_eq!(cpu.vendor, CpuVendor::Amd);
        assert_eq!(cpu.generation(), CpuGeneration::Gen5);
    }

    #[test]
    fn detects_arm() {
        let cpu = parse(ARM_NEOVERSE, Architecture::Arm64);
        assert_eq!(cpu.vendor, CpuVendor::Arm);
        assert_eq!(cpu.architecture, Architecture::Arm64);
    }

    #[test]
    fn branded_string_fallback_for_masked_vm() {
        let cpu = parse(MASKED_VM, Architecture::X86_64);
        assert_eq!(cpu.model, 0);
        assert_eq!(cpu.generation(), CpuGeneration::Gen6);
    }

    #[test]
    fn intel_catalog_has_burstable_and_gen_families() {
        let cpu = parse(INTEL_ICELAKE, Architecture::X86_64);
        let catalog = catalog_for(&cpu);
        assert!(find_type(&catalog, "t3.micro").is_some());
        assert!(find_type(&catalog, "m5.large").is_some());
        assert!(find_type(&catalog, "m6i.xlarge").is_some());
        // Ice Lake does not advertise the *7 tier.
        assert!(find_type(&catalog, "m7i.large").is_none());
    }

    #[test]
    fn amd_catalog_uses_amd_families() {
        let cpu = parse(AMD_ZEN2, Architecture::X86_64);
        let catalog = catalog_for(&cpu);
        assert!(find_type(&catalog, "t3a.micro").is_some());
        assert!(find_type(&catalog, "c5a.xlarge").is_some());
        assert!(find_type(&catalog, "t3.micro").is_none());
    }

    #[test]
    fn arm_catalog_is_graviton_shaped() {
        let cpu = parse(ARM_NEOVERSE, Architecture::Arm64);
        let catalog = catalog_for(&cpu);
        assert!(find_type(&catalog, "t4g.micro").is_some());
        assert!(find_type(&catalog, "m6g.large").is_some());
        for t in &catalog {
            assert_eq!(t.architecture, Architecture::Arm64);
        }
    }

    #[test]
    fn t3_micro_shape() {
        let cpu = parse(INTEL_ICELAKE, Architecture::X86_64);
        let catalog = catalog_for(&cpu);
        let t = find_type(&catalog, "t3.micro").unwrap();
        assert_eq!(t.vcpu, 2);
        assert_eq!(t.memory_gib, 1);
    }
}
