//! 物理设备的能力描述与挑选
//!
//! 打分逻辑是纯函数，只依赖 [`AdapterInfo`]，Vulkan 与 headless 后端共用。

use ash::vk;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{GfxError, GfxResult};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueCaps: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

impl From<vk::QueueFlags> for QueueCaps {
    fn from(flags: vk::QueueFlags) -> Self {
        let mut caps = QueueCaps::empty();
        if flags.contains(vk::QueueFlags::GRAPHICS) {
            caps |= QueueCaps::GRAPHICS;
        }
        if flags.contains(vk::QueueFlags::COMPUTE) {
            caps |= QueueCaps::COMPUTE;
        }
        if flags.contains(vk::QueueFlags::TRANSFER) {
            caps |= QueueCaps::TRANSFER;
        }
        caps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterType {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl From<vk::PhysicalDeviceType> for AdapterType {
    fn from(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterType::Virtual,
            vk::PhysicalDeviceType::CPU => AdapterType::Cpu,
            _ => AdapterType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub caps: QueueCaps,
    pub queue_count: u32,
    pub supports_present: bool,
}

/// 一张物理显卡的能力
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor_id: u32,
    pub adapter_type: AdapterType,
    /// 所有 device local heap 的总大小
    pub device_local_bytes: u64,
    pub queue_families: Vec<QueueFamilyInfo>,
    /// dynamic rendering + synchronization2
    pub supports_required_features: bool,
}

/// 设备选择偏好，对应配置文件中的 `[device]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePreferences {
    /// `nvidia` / `amd` / `intel` / `arm` / `qualcomm` / `apple`，或者十六进制的 PCI vendor id
    pub preferred_gpu_vendor: Option<String>,
    pub require_discrete: bool,
    pub min_vram_mb: u64,
    pub enable_validation: bool,
}

impl DevicePreferences {
    /// 将 vendor 字符串解析为 PCI vendor id
    pub fn preferred_vendor_id(&self) -> Option<u32> {
        let vendor = self.preferred_gpu_vendor.as_deref()?.trim().to_ascii_lowercase();
        match vendor.as_str() {
            "nvidia" => Some(0x10DE),
            "amd" => Some(0x1002),
            "intel" => Some(0x8086),
            "arm" => Some(0x13B5),
            "qualcomm" => Some(0x5143),
            "apple" => Some(0x106B),
            other => {
                let hex = other.strip_prefix("0x").unwrap_or(other);
                match u32::from_str_radix(hex, 16) {
                    Ok(id) => Some(id),
                    Err(_) => {
                        log::warn!("unknown gpu vendor in preferences: {}", other);
                        None
                    }
                }
            }
        }
    }
}

/// 选中的 queue family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSelection {
    pub graphics_family: u32,
    pub present_family: Option<u32>,
    /// 不带 graphics 的 compute family
    pub compute_family: Option<u32>,
    /// 只有 transfer 能力的 family
    pub transfer_family: Option<u32>,
}

impl QueueSelection {
    /// 需要创建的 family，去重后的
    pub fn unique_families(&self) -> Vec<u32> {
        std::iter::once(self.graphics_family)
            .chain(self.present_family)
            .chain(self.compute_family)
            .chain(self.transfer_family)
            .unique()
            .collect_vec()
    }
}

#[derive(Debug, Clone)]
pub struct AdapterSelection {
    pub index: usize,
    pub score: u64,
    pub queues: QueueSelection,
}

// tools
impl AdapterInfo {
    #[inline]
    pub fn is_discrete(&self) -> bool {
        self.adapter_type == AdapterType::Discrete
    }

    #[inline]
    pub fn vram_mb(&self) -> u64 {
        self.device_local_bytes / (1024 * 1024)
    }

    /// 根据 queue family 的能力选择 queue
    ///
    /// graphics 优先选择同时支持 present 的 family
    pub fn select_queues(&self, require_present: bool) -> Option<QueueSelection> {
        let families = &self.queue_families;
        let graphics_families = families
            .iter()
            .enumerate()
            .filter(|(_, f)| f.caps.contains(QueueCaps::GRAPHICS) && f.queue_count > 0)
            .map(|(i, _)| i as u32)
            .collect_vec();

        let graphics_family = graphics_families
            .iter()
            .copied()
            .find_or_first(|i| families[*i as usize].supports_present)?;

        let present_family = if families[graphics_family as usize].supports_present {
            Some(graphics_family)
        } else {
            families.iter().position(|f| f.supports_present && f.queue_count > 0).map(|i| i as u32)
        };
        if require_present && present_family.is_none() {
            return None;
        }

        let compute_family = families
            .iter()
            .position(|f| f.caps.contains(QueueCaps::COMPUTE) && !f.caps.contains(QueueCaps::GRAPHICS))
            .map(|i| i as u32);
        let transfer_family = families
            .iter()
            .position(|f| {
                f.caps.contains(QueueCaps::TRANSFER) && !f.caps.intersects(QueueCaps::GRAPHICS | QueueCaps::COMPUTE)
            })
            .map(|i| i as u32);

        Some(QueueSelection {
            graphics_family,
            present_family,
            compute_family,
            transfer_family,
        })
    }
}

/// 检查硬性要求，不满足时返回原因
fn check_requirements(
    adapter: &AdapterInfo,
    prefs: &DevicePreferences,
    require_present: bool,
) -> Result<QueueSelection, String> {
    if !adapter.supports_required_features {
        return Err("missing dynamic rendering or synchronization2".to_string());
    }
    if prefs.require_discrete && !adapter.is_discrete() {
        return Err(format!("not a discrete gpu ({:?})", adapter.adapter_type));
    }
    if adapter.vram_mb() < prefs.min_vram_mb {
        return Err(format!("vram {}MB < required {}MB", adapter.vram_mb(), prefs.min_vram_mb));
    }
    adapter.select_queues(require_present).ok_or_else(|| {
        if require_present {
            "no graphics + present queue family".to_string()
        } else {
            "no graphics queue family".to_string()
        }
    })
}

fn score_adapter(adapter: &AdapterInfo, prefs: &DevicePreferences, queues: &QueueSelection) -> u64 {
    let mut score = match adapter.adapter_type {
        AdapterType::Discrete => 1000,
        AdapterType::Integrated => 100,
        AdapterType::Virtual => 50,
        AdapterType::Cpu => 10,
        AdapterType::Other => 0,
    };
    if prefs.preferred_vendor_id() == Some(adapter.vendor_id) {
        score += 2000;
    }
    if queues.compute_family.is_some() {
        score += 50;
    }
    if queues.transfer_family.is_some() {
        score += 50;
    }
    // 每 256MB 显存加一分
    score + adapter.vram_mb() / 256
}

/// 在所有候选设备中选出得分最高的一个
///
/// 分数相同时保持枚举顺序
pub fn select_adapter(
    candidates: &[AdapterInfo],
    prefs: &DevicePreferences,
    require_present: bool,
) -> GfxResult<AdapterSelection> {
    let mut best: Option<AdapterSelection> = None;
    let mut rejected = vec![];

    for (index, adapter) in candidates.iter().enumerate() {
        match check_requirements(adapter, prefs, require_present) {
            Ok(queues) => {
                let score = score_adapter(adapter, prefs, &queues);
                log::info!("gpu candidate [{}] {}: score {}", index, adapter.name, score);
                if best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(AdapterSelection { index, score, queues });
                }
            }
            Err(reason) => {
                log::warn!("gpu candidate [{}] {} rejected: {}", index, adapter.name, reason);
                rejected.push(format!("{}: {}", adapter.name, reason));
            }
        }
    }

    best.ok_or_else(|| GfxError::DeviceInit {
        reason: if candidates.is_empty() {
            "no physical device found".to_string()
        } else {
            format!("no device meets requirements [{}]", rejected.join("; "))
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(caps: QueueCaps, present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            caps,
            queue_count: 1,
            supports_present: present,
        }
    }

    fn adapter(name: &str, vendor_id: u32, adapter_type: AdapterType, vram_mb: u64) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            vendor_id,
            adapter_type,
            device_local_bytes: vram_mb * 1024 * 1024,
            queue_families: vec![family(QueueCaps::all(), true)],
            supports_required_features: true,
        }
    }

    #[test]
    fn test_prefers_discrete() {
        let candidates = vec![
            adapter("igpu", 0x8086, AdapterType::Integrated, 2048),
            adapter("dgpu", 0x10DE, AdapterType::Discrete, 8192),
        ];
        let selection = select_adapter(&candidates, &DevicePreferences::default(), true).unwrap();
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn test_preferred_vendor_wins_over_discrete() {
        let candidates = vec![
            adapter("dgpu", 0x10DE, AdapterType::Discrete, 8192),
            adapter("igpu", 0x8086, AdapterType::Integrated, 2048),
        ];
        let prefs = DevicePreferences {
            preferred_gpu_vendor: Some("Intel".to_string()),
            ..Default::default()
        };
        let selection = select_adapter(&candidates, &prefs, true).unwrap();
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn test_require_discrete_rejects_all() {
        let candidates = vec![adapter("igpu", 0x8086, AdapterType::Integrated, 2048)];
        let prefs = DevicePreferences {
            require_discrete: true,
            ..Default::default()
        };
        let err = select_adapter(&candidates, &prefs, true).unwrap_err();
        assert!(matches!(err, GfxError::DeviceInit { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_min_vram() {
        let candidates = vec![
            adapter("small", 0x1002, AdapterType::Discrete, 1024),
            adapter("big", 0x1002, AdapterType::Discrete, 4096),
        ];
        let prefs = DevicePreferences {
            min_vram_mb: 2048,
            ..Default::default()
        };
        assert_eq!(select_adapter(&candidates, &prefs, true).unwrap().index, 1);
    }

    #[test]
    fn test_no_present_family() {
        let mut gpu = adapter("gpu", 0x1002, AdapterType::Discrete, 4096);
        gpu.queue_families = vec![family(QueueCaps::all(), false)];
        let candidates = vec![gpu];

        assert!(select_adapter(&candidates, &DevicePreferences::default(), true).is_err());
        // 没有 surface 时不需要 present
        assert!(select_adapter(&candidates, &DevicePreferences::default(), false).is_ok());
    }

    #[test]
    fn test_queue_selection_dedicated_families() {
        let mut gpu = adapter("gpu", 0x10DE, AdapterType::Discrete, 4096);
        gpu.queue_families = vec![
            family(QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, false),
            family(QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, true),
            family(QueueCaps::COMPUTE | QueueCaps::TRANSFER, false),
            family(QueueCaps::TRANSFER, false),
        ];
        let queues = gpu.select_queues(true).unwrap();
        // graphics 优先选择能 present 的 family
        assert_eq!(queues.graphics_family, 1);
        assert_eq!(queues.present_family, Some(1));
        assert_eq!(queues.compute_family, Some(2));
        assert_eq!(queues.transfer_family, Some(3));
        assert_eq!(queues.unique_families(), vec![1, 2, 3]);
    }

    #[test]
    fn test_vendor_hex_id() {
        let prefs = DevicePreferences {
            preferred_gpu_vendor: Some("0x10de".to_string()),
            ..Default::default()
        };
        assert_eq!(prefs.preferred_vendor_id(), Some(0x10DE));
    }
}
