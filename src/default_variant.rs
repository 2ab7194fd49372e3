//! Built-in variant values used when the variant configuration is silent
use std::collections::BTreeMap;

use rattler_conda_types::Platform;
use recipe_matrix_types::NormalizedKey;

/// Source of per-platform default values for variant keys
pub trait DefaultVariantTable {
    /// Default value of every known key for `platform`
    fn get_default(&self, platform: Platform) -> BTreeMap<NormalizedKey, String>;

    /// Default compiler package (without the platform suffix) for `language`
    fn compiler(&self, language: &str, platform: Platform) -> Option<String> {
        self.get_default(platform)
            .remove(&NormalizedKey::from(format!("{language}_compiler")))
    }
}

/// The defaults a conda toolchain would pick for a platform
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformDefaults;

/// Default compiler names for a platform family
fn default_compilers(platform: Platform) -> &'static [(&'static str, &'static str)] {
    if platform.is_windows() {
        // these depend on the python version in conda-build, we use the most common one
        &[
            ("c", "vs2017"),
            ("cxx", "vs2017"),
            ("fortran", "gfortran"),
            ("rust", "rust"),
        ]
    } else if platform.is_osx() {
        &[
            ("c", "clang"),
            ("cxx", "clangxx"),
            ("fortran", "gfortran"),
            ("rust", "rust"),
        ]
    } else {
        &[
            ("c", "gcc"),
            ("cxx", "gxx"),
            ("fortran", "gfortran"),
            ("rust", "rust"),
        ]
    }
}

impl DefaultVariantTable for PlatformDefaults {
    fn get_default(&self, platform: Platform) -> BTreeMap<NormalizedKey, String> {
        let mut defaults = BTreeMap::new();
        defaults.insert("target_platform".into(), platform.to_string());

        for (language, compiler) in default_compilers(platform) {
            defaults.insert(format!("{language}_compiler").into(), compiler.to_string());
        }

        for (key, value) in [
            ("python", "3.12"),
            ("numpy", "1.26"),
            ("perl", "5.32.1"),
            ("lua", "5"),
            ("r_base", "4.3"),
        ] {
            defaults.insert(key.into(), value.to_string());
        }

        defaults
    }
}

/// Environment-variable style keys that are copied from the variant
/// configuration when present, chosen by the target platform.
pub fn sys_var_stubs(platform: Platform) -> Vec<&'static str> {
    let mut stubs = vec!["CONDA_BUILD_SYSROOT"];

    if platform.is_windows() {
        stubs.extend([
            "SCRIPTS",
            "LIBRARY_PREFIX",
            "LIBRARY_BIN",
            "LIBRARY_INC",
            "LIBRARY_LIB",
            "CYGWIN_PREFIX",
            "ALLUSERSPROFILE",
            "APPDATA",
            "CommonProgramFiles",
            "CommonProgramFiles(x86)",
            "CommonProgramW6432",
            "COMPUTERNAME",
            "ComSpec",
            "HOMEDRIVE",
            "HOMEPATH",
            "LOCALAPPDATA",
            "LOGONSERVER",
            "NUMBER_OF_PROCESSORS",
            "PATHEXT",
            "ProgramData",
            "ProgramFiles",
            "ProgramFiles(x86)",
            "ProgramW6432",
            "PROMPT",
            "PSModulePath",
            "PUBLIC",
            "SystemDrive",
            "SystemRoot",
            "TEMP",
            "TMP",
            "USERDOMAIN",
            "USERNAME",
            "USERPROFILE",
            "windir",
            "PROCESSOR_ARCHITEW6432",
            "PROCESSOR_ARCHITECTURE",
            "PROCESSOR_IDENTIFIER",
            "BUILD",
        ]);
    } else {
        stubs.extend(["HOME", "PKG_CONFIG_PATH", "CMAKE_GENERATOR", "SSL_CERT_FILE"]);
    }

    if platform.is_osx() {
        stubs.extend([
            "OSX_ARCH",
            "MACOSX_DEPLOYMENT_TARGET",
            "BUILD",
            "macos_machine",
            "macos_min_version",
        ]);
    } else if platform.is_linux() {
        stubs.extend([
            "CFLAGS",
            "CXXFLAGS",
            "LDFLAGS",
            "QEMU_LD_PREFIX",
            "QEMU_UNAME",
            "DEJAGNU",
            "DISPLAY",
            "LD_RUN_PATH",
            "BUILD",
        ]);
    }

    stubs
}
