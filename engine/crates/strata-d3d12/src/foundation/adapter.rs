use strata_gfx::error::{GfxError, GfxResult};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_12_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::Interface;

/// DXGI factory 以及选中的 adapter
pub struct Adapter {
    factory: IDXGIFactory4,
    adapter: IDXGIAdapter1,
    name: String,
    dedicated_video_memory: usize,
}

// new & init
impl Adapter {
    pub fn new(enable_validation: bool) -> GfxResult<Self> {
        let _span = tracy_client::span!("Adapter::new");

        if enable_validation {
            Self::enable_debug_layer();
        }
        let factory = Self::create_factory(enable_validation)?;
        let (adapter, desc) = Self::pick(&factory)?;

        let name = adapter_name(&desc.Description);
        log::info!("d3d12 adapter: {}, vram: {} MiB", name, desc.DedicatedVideoMemory >> 20);
        Ok(Self {
            factory,
            adapter,
            name,
            dedicated_video_memory: desc.DedicatedVideoMemory,
        })
    }

    fn enable_debug_layer() {
        let mut debug: Option<ID3D12Debug> = None;
        match unsafe { D3D12GetDebugInterface(&mut debug) } {
            Ok(()) => {
                if let Some(debug) = debug {
                    unsafe { debug.EnableDebugLayer() };
                    log::info!("d3d12 debug layer enabled");
                }
            }
            Err(e) => log::warn!("d3d12 debug layer is not available: {}", e),
        }
    }

    /// 没有安装 graphics tools 时 debug factory 会创建失败，此时退回普通 factory
    fn create_factory(enable_validation: bool) -> GfxResult<IDXGIFactory4> {
        if enable_validation {
            match unsafe { CreateDXGIFactory2::<IDXGIFactory4>(DXGI_CREATE_FACTORY_DEBUG) } {
                Ok(factory) => return Ok(factory),
                Err(e) => log::warn!("failed to create debug dxgi factory: {}", e),
            }
        }
        unsafe { CreateDXGIFactory2::<IDXGIFactory4>(DXGI_CREATE_FACTORY_FLAGS(0)) }
            .map_err(|e| GfxError::InstanceCreateFailed(format!("dxgi factory: {e}")))
    }

    /// 按照性能优先的顺序遍历 adapter，跳过软件 adapter 以及不支持 FL 12_0 的 adapter
    fn pick(factory: &IDXGIFactory4) -> GfxResult<(IDXGIAdapter1, DXGI_ADAPTER_DESC1)> {
        let factory6 = factory.cast::<IDXGIFactory6>().ok();
        for index in 0.. {
            let adapter = match &factory6 {
                Some(factory6) => unsafe {
                    factory6.EnumAdapterByGpuPreference::<IDXGIAdapter1>(index, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE)
                },
                None => unsafe { factory.EnumAdapters1(index) },
            };
            // DXGI_ERROR_NOT_FOUND 表示遍历结束
            let Ok(adapter) = adapter else { break };

            let Ok(desc) = (unsafe { adapter.GetDesc1() }) else { continue };
            if desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
                log::debug!("skip software adapter: {}", adapter_name(&desc.Description));
                continue;
            }
            let supported = unsafe {
                D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_12_0, std::ptr::null_mut::<Option<ID3D12Device>>())
            }
            .is_ok();
            if supported {
                return Ok((adapter, desc));
            }
            log::debug!("skip adapter without feature level 12_0: {}", adapter_name(&desc.Description));
        }
        Err(GfxError::GpuSelectionFailed("no hardware adapter supports feature level 12_0".to_string()))
    }
}

// getters
impl Adapter {
    #[inline]
    pub fn factory(&self) -> &IDXGIFactory4 {
        &self.factory
    }

    #[inline]
    pub fn adapter(&self) -> &IDXGIAdapter1 {
        &self.adapter
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dedicated_video_memory(&self) -> usize {
        self.dedicated_video_memory
    }

    /// 是否支持关闭垂直同步时的 tearing
    pub fn supports_tearing(&self) -> bool {
        let Ok(factory5) = self.factory.cast::<IDXGIFactory5>() else {
            return false;
        };
        let mut allow = windows::Win32::Foundation::BOOL(0);
        let result = unsafe {
            factory5.CheckFeatureSupport(
                DXGI_FEATURE_PRESENT_ALLOW_TEARING,
                &mut allow as *mut _ as *mut std::ffi::c_void,
                std::mem::size_of_val(&allow) as u32,
            )
        };
        result.is_ok() && allow.as_bool()
    }
}

/// adapter 描述中的名字是以 0 结尾的 UTF-16
fn adapter_name(description: &[u16]) -> String {
    let len = description.iter().position(|c| *c == 0).unwrap_or(description.len());
    String::from_utf16_lossy(&description[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_name() {
        let mut raw = [0u16; 128];
        for (dst, src) in raw.iter_mut().zip("Test GPU".encode_utf16()) {
            *dst = src;
        }
        assert_eq!(adapter_name(&raw), "Test GPU");
    }
}
