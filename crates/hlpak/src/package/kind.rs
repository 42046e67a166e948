//! Package type detection from signatures and file extensions

use std::fmt;
use std::path::Path;

/// Archive formats of the package family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    /// Half-Life level (`.bsp`)
    Bsp,
    /// Steam cache file (`.gcf`)
    Gcf,
    /// Steam non-cache file (`.ncf`)
    Ncf,
    /// Quake package (`.pak`)
    Pak,
    /// Relic game archive (`.sga`)
    Sga,
    /// Source engine level (`.bsp`, `VBSP` signature)
    Vbsp,
    /// Valve package (`.vpk`)
    Vpk,
    /// Texture archive (`.wad`)
    Wad,
    /// Xbox package (`.xzp`)
    Xzp,
    /// Zip archive (`.zip`)
    Zip,
}

const SIGNATURES: &[(PackageType, &[u8])] = &[
    (PackageType::Bsp, &[0x1E, 0x00, 0x00, 0x00]),
    (
        PackageType::Gcf,
        &[0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
    ),
    (
        PackageType::Ncf,
        &[0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00],
    ),
    (PackageType::Pak, b"PACK"),
    (PackageType::Sga, b"_ARCHIVE"),
    (PackageType::Vbsp, b"VBSP"),
    (PackageType::Vpk, &[0x34, 0x12, 0xAA, 0x55]),
    (PackageType::Wad, b"WAD3"),
    (PackageType::Xzp, b"piZx"),
    (PackageType::Zip, &[b'P', b'K', 0x03, 0x04]),
];

impl PackageType {
    /// Longest signature; read at least this many bytes before detecting.
    pub const SIGNATURE_LENGTH: usize = 8;

    /// Detect the format from the first bytes of a source.
    pub fn detect(header: &[u8]) -> Option<Self> {
        SIGNATURES
            .iter()
            .find(|(_, signature)| header.starts_with(signature))
            .map(|&(kind, _)| kind)
    }

    /// Guess the format from a file extension.
    ///
    /// `.bsp` maps to [`PackageType::Bsp`]; only the signature tells the
    /// Source variant apart.
    pub fn from_extension(path: impl AsRef<Path>) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "bsp" => Some(Self::Bsp),
            "gcf" => Some(Self::Gcf),
            "ncf" => Some(Self::Ncf),
            "pak" => Some(Self::Pak),
            "sga" => Some(Self::Sga),
            "vpk" => Some(Self::Vpk),
            "wad" => Some(Self::Wad),
            "xzp" => Some(Self::Xzp),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// Short display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bsp => "BSP",
            Self::Gcf => "GCF",
            Self::Ncf => "NCF",
            Self::Pak => "PAK",
            Self::Sga => "SGA",
            Self::Vbsp => "VBSP",
            Self::Vpk => "VPK",
            Self::Wad => "WAD",
            Self::Xzp => "XZP",
            Self::Zip => "ZIP",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
