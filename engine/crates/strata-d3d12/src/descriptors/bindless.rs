use itertools::Itertools;
use strata_gfx::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::shader::PUSH_CONSTANT_SIZE;
use strata_gfx::settings::DescriptorCapacities;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;

use crate::convert;
use crate::descriptors::heap_layout::{HeapLayout, register_space, root_parameter_index};
use crate::foundation::device::set_debug_name;

/// 两个 shader visible heap 以及所有 shader 共享的 root signature
///
/// root signature 的参数 0 是 `b0, space0` 上的 root constants，对应 push constant；
/// 之后每种 [`DescriptorKind`] 占用一个 descriptor table，table 覆盖它在 heap 中的整个区间。
/// range 都带有 `DESCRIPTORS_VOLATILE`，slot 可以在 command list 录制之后改写。
pub struct BindlessHeaps {
    resource_heap: ID3D12DescriptorHeap,
    sampler_heap: ID3D12DescriptorHeap,
    resource_increment: u32,
    sampler_increment: u32,

    layout: HeapLayout,
    root_signature: ID3D12RootSignature,
}

// new & init
impl BindlessHeaps {
    pub fn new(device: &ID3D12Device, capacities: &DescriptorCapacities) -> GfxResult<Self> {
        let _span = tracy_client::span!("BindlessHeaps::new");

        let layout = HeapLayout::new(capacities);
        let resource_heap = Self::create_heap(
            device,
            D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            layout.resource_descriptor_count(),
            "bindless-resources",
        )?;
        let sampler_heap = Self::create_heap(
            device,
            D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
            layout.sampler_descriptor_count(),
            "bindless-samplers",
        )?;
        let root_signature = Self::create_root_signature(device, &layout)?;

        log::info!(
            "bindless heaps created, resources: {}, samplers: {}",
            layout.resource_descriptor_count(),
            layout.sampler_descriptor_count()
        );
        Ok(Self {
            resource_increment: unsafe { device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV) },
            sampler_increment: unsafe { device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER) },
            resource_heap,
            sampler_heap,
            layout,
            root_signature,
        })
    }

    fn create_heap(
        device: &ID3D12Device,
        ty: D3D12_DESCRIPTOR_HEAP_TYPE,
        count: u32,
        name: &str,
    ) -> GfxResult<ID3D12DescriptorHeap> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: ty,
            NumDescriptors: count,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
            NodeMask: 0,
        };
        let heap: ID3D12DescriptorHeap = unsafe { device.CreateDescriptorHeap(&desc) }
            .map_err(|e| GfxError::DescriptorLayoutCreateFailed(format!("{name} heap: {e}")))?;
        set_debug_name(&heap, format!("DescriptorHeap::{name}"));
        Ok(heap)
    }

    fn create_root_signature(device: &ID3D12Device, layout: &HeapLayout) -> GfxResult<ID3D12RootSignature> {
        // 每个 table 只有一个 range，range 需要在序列化结束前保持存活
        let ranges = DescriptorKind::ALL
            .iter()
            .map(|kind| {
                let mut flags = D3D12_DESCRIPTOR_RANGE_FLAG_DESCRIPTORS_VOLATILE;
                if *kind != DescriptorKind::Sampler {
                    flags |= D3D12_DESCRIPTOR_RANGE_FLAG_DATA_VOLATILE;
                }
                D3D12_DESCRIPTOR_RANGE1 {
                    RangeType: convert::descriptor_range_type(*kind),
                    NumDescriptors: layout.capacity(*kind),
                    BaseShaderRegister: 0,
                    RegisterSpace: register_space(*kind),
                    Flags: flags,
                    OffsetInDescriptorsFromTableStart: 0,
                }
            })
            .collect_vec();

        let mut params = vec![D3D12_ROOT_PARAMETER1 {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER1_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: PUSH_CONSTANT_SIZE / 4,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        }];
        params.extend(ranges.iter().map(|range| D3D12_ROOT_PARAMETER1 {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER1_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE1 {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        }));
        debug_assert!(DescriptorKind::ALL.iter().all(|kind| (root_parameter_index(*kind) as usize) < params.len()));

        let desc = D3D12_VERSIONED_ROOT_SIGNATURE_DESC {
            Version: D3D_ROOT_SIGNATURE_VERSION_1_1,
            Anonymous: D3D12_VERSIONED_ROOT_SIGNATURE_DESC_0 {
                Desc_1_1: D3D12_ROOT_SIGNATURE_DESC1 {
                    NumParameters: params.len() as u32,
                    pParameters: params.as_ptr(),
                    NumStaticSamplers: 0,
                    pStaticSamplers: std::ptr::null(),
                    Flags: D3D12_ROOT_SIGNATURE_FLAG_NONE,
                },
            },
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        let result = unsafe { D3D12SerializeVersionedRootSignature(&desc, &mut blob, Some(&mut error)) };
        if let Err(e) = result {
            let detail = error.as_ref().map(blob_to_string).unwrap_or_default();
            return Err(GfxError::PipelineLayoutCreateFailed(format!("serialize root signature: {e} {detail}")));
        }
        let blob = blob.ok_or_else(|| GfxError::PipelineLayoutCreateFailed("root signature blob is null".to_string()))?;

        let bytes = unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) };
        let root_signature: ID3D12RootSignature = unsafe { device.CreateRootSignature(0, bytes) }
            .map_err(|e| GfxError::PipelineLayoutCreateFailed(e.to_string()))?;
        set_debug_name(&root_signature, "RootSignature::bindless");
        Ok(root_signature)
    }
}

// getters
impl BindlessHeaps {
    #[inline]
    pub fn root_signature(&self) -> &ID3D12RootSignature {
        &self.root_signature
    }

    #[inline]
    pub fn capacity(&self, kind: DescriptorKind) -> u32 {
        self.layout.capacity(kind)
    }

    /// SetDescriptorHeaps 的参数
    #[inline]
    pub fn heaps(&self) -> [Option<ID3D12DescriptorHeap>; 2] {
        [Some(self.resource_heap.clone()), Some(self.sampler_heap.clone())]
    }
}

// tools
impl BindlessHeaps {
    /// slot 对应的 CPU handle，用于创建 view 或者 sampler
    pub fn cpu_handle(&self, slot: DescriptorSlot) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let (heap, increment) = self.heap_of(slot.kind);
        let start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + self.layout.heap_index(slot) as usize * increment as usize,
        }
    }

    /// 某种 descriptor 的 table 起点
    fn table_start(&self, kind: DescriptorKind) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        let (heap, increment) = self.heap_of(kind);
        let start = unsafe { heap.GetGPUDescriptorHandleForHeapStart() };
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + self.layout.range(kind).offset as u64 * increment as u64,
        }
    }

    fn heap_of(&self, kind: DescriptorKind) -> (&ID3D12DescriptorHeap, u32) {
        if kind == DescriptorKind::Sampler {
            (&self.sampler_heap, self.sampler_increment)
        } else {
            (&self.resource_heap, self.resource_increment)
        }
    }

    /// 在 graphics 管线上绑定 root signature 与所有 descriptor table
    pub fn bind_graphics(&self, list: &ID3D12GraphicsCommandList) {
        unsafe {
            list.SetGraphicsRootSignature(&self.root_signature);
            for kind in DescriptorKind::ALL {
                list.SetGraphicsRootDescriptorTable(root_parameter_index(kind), self.table_start(kind));
            }
        }
    }

    /// 在 compute 管线上绑定 root signature 与所有 descriptor table
    pub fn bind_compute(&self, list: &ID3D12GraphicsCommandList) {
        unsafe {
            list.SetComputeRootSignature(&self.root_signature);
            for kind in DescriptorKind::ALL {
                list.SetComputeRootDescriptorTable(root_parameter_index(kind), self.table_start(kind));
            }
        }
    }
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    let bytes = unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) };
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
}
