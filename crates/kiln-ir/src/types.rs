//! Type interning and host-shareable layout for the arena IR.
//!
//! Non-struct types are hash-consed: the same `TypeData` always yields the
//! same `TypeRef`. Structs are nominal and identified by their (unique)
//! name, so a struct's explicit-layout marker can be flipped in place without
//! changing its identity. An array's explicit-stride marker is part of its
//! data, so an explicit-stride array is a distinct type from its plain twin.

use std::collections::{HashMap, HashSet};
use std::fmt;

use cranelift_entity::PrimaryMap;
use serde::{Deserialize, Serialize};

use crate::refs::TypeRef;
use crate::symbol::Symbol;

// ============================================================================
// Address spaces
// ============================================================================

/// Storage domain of a memory declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    PushConstant,
    Handle,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressSpace::Function => "function",
            AddressSpace::Private => "private",
            AddressSpace::Workgroup => "workgroup",
            AddressSpace::Uniform => "uniform",
            AddressSpace::Storage => "storage",
            AddressSpace::PushConstant => "push_constant",
            AddressSpace::Handle => "handle",
        })
    }
}

/// Access mode of a pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::ReadWrite => "read_write",
        })
    }
}

// ============================================================================
// Type data
// ============================================================================

/// Element count of an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayCount {
    Fixed(u32),
    RuntimeSized,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayType {
    pub elem: TypeRef,
    pub count: ArrayCount,
    pub align: u32,
    pub size: u32,
    pub stride: u32,
    /// Carries an explicit stride decoration.
    pub explicit_stride: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructMember {
    pub name: Symbol,
    pub ty: TypeRef,
    pub index: u32,
    pub offset: u32,
    pub align: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: Symbol,
    pub members: Vec<StructMember>,
    pub align: u32,
    pub size: u32,
}

/// Data for a single interned type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeData {
    Void,
    Bool,
    I32,
    U32,
    F32,
    F16,
    Vector {
        elem: TypeRef,
        width: u8,
    },
    Matrix {
        column: TypeRef,
        columns: u8,
    },
    Array(ArrayType),
    Struct(StructType),
    Pointer {
        space: AddressSpace,
        store: TypeRef,
        access: Access,
    },
    Sampler,
    Texture {
        sampled: TypeRef,
    },
}

/// Payload of a module constant.
///
/// Floats are stored as raw bits so constants can be hashed and interned.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(u32),
    /// The zero value of the constant's type.
    Zero,
}

// ============================================================================
// TypeInterner
// ============================================================================

/// Type store owned by a module.
pub struct TypeInterner {
    types: PrimaryMap<TypeRef, TypeData>,
    dedup: HashMap<TypeData, TypeRef>,
    structs: HashMap<Symbol, TypeRef>,
    explicit_layout: HashSet<TypeRef>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self {
            types: PrimaryMap::new(),
            dedup: HashMap::default(),
            structs: HashMap::default(),
            explicit_layout: HashSet::default(),
        }
    }

    /// Intern a type, returning an existing ref if the data matches.
    ///
    /// # Panics
    ///
    /// Panics if `data` is a struct whose name is already taken by a struct
    /// with different contents.
    pub fn intern(&mut self, data: TypeData) -> TypeRef {
        if let TypeData::Struct(s) = &data {
            if let Some(&existing) = self.structs.get(&s.name) {
                assert!(
                    self.types[existing] == data,
                    "intern: struct name `{}` is already used by {existing}",
                    s.name,
                );
                return existing;
            }
            let name = s.name;
            let r = self.types.push(data);
            self.structs.insert(name, r);
            return r;
        }
        if let Some(&existing) = self.dedup.get(&data) {
            return existing;
        }
        let r = self.types.push(data.clone());
        self.dedup.insert(data, r);
        r
    }

    /// Look up type data by reference.
    pub fn get(&self, r: TypeRef) -> &TypeData {
        &self.types[r]
    }

    /// Number of distinct types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All types in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeRef, &TypeData)> {
        self.types.iter()
    }

    /// Find a struct by name.
    pub fn struct_named(&self, name: Symbol) -> Option<TypeRef> {
        self.structs.get(&name).copied()
    }

    /// Derive a struct name from `base` that is not yet in use.
    pub fn unique_struct_name(&self, base: &str) -> Symbol {
        let candidate = Symbol::from_dynamic(base);
        if !self.structs.contains_key(&candidate) {
            return candidate;
        }
        (1..)
            .map(|n| Symbol::from_dynamic(&format!("{base}_{n}")))
            .find(|s| !self.structs.contains_key(s))
            .expect("unbounded suffix search always finds a free name")
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn void(&mut self) -> TypeRef {
        self.intern(TypeData::Void)
    }

    pub fn bool(&mut self) -> TypeRef {
        self.intern(TypeData::Bool)
    }

    pub fn i32(&mut self) -> TypeRef {
        self.intern(TypeData::I32)
    }

    pub fn u32(&mut self) -> TypeRef {
        self.intern(TypeData::U32)
    }

    pub fn f32(&mut self) -> TypeRef {
        self.intern(TypeData::F32)
    }

    pub fn f16(&mut self) -> TypeRef {
        self.intern(TypeData::F16)
    }

    pub fn vec(&mut self, elem: TypeRef, width: u8) -> TypeRef {
        self.intern(TypeData::Vector { elem, width })
    }

    pub fn mat(&mut self, column: TypeRef, columns: u8) -> TypeRef {
        self.intern(TypeData::Matrix { column, columns })
    }

    pub fn ptr(&mut self, space: AddressSpace, store: TypeRef, access: Access) -> TypeRef {
        self.intern(TypeData::Pointer {
            space,
            store,
            access,
        })
    }

    pub fn sampler(&mut self) -> TypeRef {
        self.intern(TypeData::Sampler)
    }

    pub fn texture(&mut self, sampled: TypeRef) -> TypeRef {
        self.intern(TypeData::Texture { sampled })
    }

    /// Fixed-size array with the natural host-shareable stride.
    pub fn array(&mut self, elem: TypeRef, count: u32) -> TypeRef {
        let align = self.align_of(elem);
        let stride = round_up(align, self.size_of(elem));
        self.intern(TypeData::Array(ArrayType {
            elem,
            count: ArrayCount::Fixed(count),
            align,
            size: stride * count,
            stride,
            explicit_stride: false,
        }))
    }

    /// Runtime-sized array with the natural host-shareable stride.
    pub fn runtime_array(&mut self, elem: TypeRef) -> TypeRef {
        let align = self.align_of(elem);
        let stride = round_up(align, self.size_of(elem));
        self.intern(TypeData::Array(ArrayType {
            elem,
            count: ArrayCount::RuntimeSized,
            align,
            size: stride,
            stride,
            explicit_stride: false,
        }))
    }

    /// Declare a struct, laying members out with host-shareable rules.
    pub fn struct_type(&mut self, name: Symbol, members: &[(Symbol, TypeRef)]) -> TypeRef {
        let mut offset = 0;
        let mut struct_align = 1;
        let mut laid_out = Vec::with_capacity(members.len());
        for (index, &(member_name, ty)) in members.iter().enumerate() {
            let align = self.align_of(ty);
            let size = self.size_of(ty);
            offset = round_up(align, offset);
            laid_out.push(StructMember {
                name: member_name,
                ty,
                index: index as u32,
                offset,
                align,
                size,
            });
            offset += size;
            struct_align = struct_align.max(align);
        }
        self.intern(TypeData::Struct(StructType {
            name,
            members: laid_out,
            align: struct_align,
            size: round_up(struct_align, offset),
        }))
    }

    // ========================================================================
    // Explicit layout
    // ========================================================================

    /// Mark a struct as carrying explicit layout decorations.
    ///
    /// # Panics
    ///
    /// Panics if `ty` is not a struct; arrays encode the marker in their data.
    pub fn mark_explicit_layout(&mut self, ty: TypeRef) {
        assert!(
            matches!(self.types[ty], TypeData::Struct(_)),
            "mark_explicit_layout: {ty} is not a struct",
        );
        self.explicit_layout.insert(ty);
    }

    /// Whether `ty` itself carries explicit layout decorations.
    pub fn has_explicit_layout(&self, ty: TypeRef) -> bool {
        match &self.types[ty] {
            TypeData::Struct(_) => self.explicit_layout.contains(&ty),
            TypeData::Array(a) => a.explicit_stride,
            _ => false,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Store type of a pointer.
    pub fn pointee(&self, ty: TypeRef) -> Option<TypeRef> {
        match self.types[ty] {
            TypeData::Pointer { store, .. } => Some(store),
            _ => None,
        }
    }

    /// Address space and access of a pointer.
    pub fn pointer_info(&self, ty: TypeRef) -> Option<(AddressSpace, Access)> {
        match self.types[ty] {
            TypeData::Pointer { space, access, .. } => Some((space, access)),
            _ => None,
        }
    }

    pub fn is_void(&self, ty: TypeRef) -> bool {
        matches!(self.types[ty], TypeData::Void)
    }

    /// Samplers and textures: opaque handles to resources.
    pub fn is_handle(&self, ty: TypeRef) -> bool {
        matches!(self.types[ty], TypeData::Sampler | TypeData::Texture { .. })
    }

    /// Type of element/member `index` when indexing into `ty`.
    pub fn element_type(&self, ty: TypeRef, index: Option<u32>) -> Option<TypeRef> {
        match &self.types[ty] {
            TypeData::Vector { elem, .. } => Some(*elem),
            TypeData::Matrix { column, .. } => Some(*column),
            TypeData::Array(a) => Some(a.elem),
            TypeData::Struct(s) => index
                .and_then(|i| s.members.get(i as usize))
                .map(|m| m.ty),
            _ => None,
        }
    }

    /// Host-shareable size in bytes. Types without a memory representation
    /// report zero.
    pub fn size_of(&self, ty: TypeRef) -> u32 {
        match &self.types[ty] {
            TypeData::Bool | TypeData::I32 | TypeData::U32 | TypeData::F32 => 4,
            TypeData::F16 => 2,
            TypeData::Vector { elem, width } => self.size_of(*elem) * u32::from(*width),
            TypeData::Matrix { column, columns } => {
                let stride = round_up(self.align_of(*column), self.size_of(*column));
                stride * u32::from(*columns)
            }
            TypeData::Array(a) => a.size,
            TypeData::Struct(s) => s.size,
            TypeData::Void
            | TypeData::Pointer { .. }
            | TypeData::Sampler
            | TypeData::Texture { .. } => 0,
        }
    }

    /// Host-shareable alignment in bytes.
    pub fn align_of(&self, ty: TypeRef) -> u32 {
        match &self.types[ty] {
            TypeData::Bool | TypeData::I32 | TypeData::U32 | TypeData::F32 => 4,
            TypeData::F16 => 2,
            TypeData::Vector { elem, width } => {
                let lanes = if *width == 2 { 2 } else { 4 };
                self.align_of(*elem) * lanes
            }
            TypeData::Matrix { column, .. } => self.align_of(*column),
            TypeData::Array(a) => a.align,
            TypeData::Struct(s) => s.align,
            TypeData::Void
            | TypeData::Pointer { .. }
            | TypeData::Sampler
            | TypeData::Texture { .. } => 1,
        }
    }

    /// Render a type as text.
    pub fn display(&self, ty: TypeRef) -> TypeDisplay<'_> {
        TypeDisplay { types: self, ty }
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

fn round_up(align: u32, value: u32) -> u32 {
    value.div_ceil(align) * align
}

/// `Display` adaptor returned by [`TypeInterner::display`].
pub struct TypeDisplay<'a> {
    types: &'a TypeInterner,
    ty: TypeRef,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self.types;
        match types.get(self.ty) {
            TypeData::Void => f.write_str("void"),
            TypeData::Bool => f.write_str("bool"),
            TypeData::I32 => f.write_str("i32"),
            TypeData::U32 => f.write_str("u32"),
            TypeData::F32 => f.write_str("f32"),
            TypeData::F16 => f.write_str("f16"),
            TypeData::Vector { elem, width } => {
                write!(f, "vec{width}<{}>", types.display(*elem))
            }
            TypeData::Matrix { column, columns } => match types.get(*column) {
                TypeData::Vector { elem, width } => {
                    write!(f, "mat{columns}x{width}<{}>", types.display(*elem))
                }
                _ => write!(f, "mat{columns}<{}>", types.display(*column)),
            },
            TypeData::Array(a) => {
                match a.count {
                    ArrayCount::Fixed(n) => write!(f, "array<{}, {n}>", types.display(a.elem))?,
                    ArrayCount::RuntimeSized => write!(f, "array<{}>", types.display(a.elem))?,
                }
                if a.explicit_stride {
                    write!(f, " @stride({})", a.stride)?;
                }
                Ok(())
            }
            TypeData::Struct(s) => write!(f, "{}", s.name),
            TypeData::Pointer {
                space,
                store,
                access,
            } => write!(f, "ptr<{space}, {}, {access}>", types.display(*store)),
            TypeData::Sampler => f.write_str("sampler"),
            TypeData::Texture { sampled } => write!(f, "texture<{}>", types.display(*sampled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_dedups_structural_types() {
        let mut types = TypeInterner::new();
        let f32_ty = types.f32();
        let a = types.array(f32_ty, 4);
        let b = types.array(f32_ty, 4);
        assert_eq!(a, b, "same TypeData must yield same TypeRef");
        let c = types.array(f32_ty, 8);
        assert_ne!(a, c);
    }

    #[test]
    fn struct_identity_is_nominal() {
        let mut types = TypeInterner::new();
        let i32_ty = types.i32();
        let s1 = types.struct_type(Symbol::new("Pair"), &[(Symbol::new("x"), i32_ty)]);
        let s2 = types.struct_type(Symbol::new("Pair"), &[(Symbol::new("x"), i32_ty)]);
        assert_eq!(s1, s2);
        let other = types.struct_type(Symbol::new("Other"), &[(Symbol::new("x"), i32_ty)]);
        assert_ne!(s1, other);
    }

    #[test]
    #[should_panic(expected = "already used by")]
    fn conflicting_struct_name_panics() {
        let mut types = TypeInterner::new();
        let i32_ty = types.i32();
        let f32_ty = types.f32();
        types.struct_type(Symbol::new("Clash"), &[(Symbol::new("x"), i32_ty)]);
        types.struct_type(Symbol::new("Clash"), &[(Symbol::new("x"), f32_ty)]);
    }

    #[test]
    fn struct_layout_follows_host_shareable_rules() {
        let mut types = TypeInterner::new();
        let f32_ty = types.f32();
        let i32_ty = types.i32();
        let v3 = types.vec(f32_ty, 3);
        let arr = types.array(f32_ty, 4);
        let s = types.struct_type(
            Symbol::new("Layout"),
            &[
                (Symbol::new("a"), i32_ty),
                (Symbol::new("v"), v3),
                (Symbol::new("b"), arr),
            ],
        );
        let TypeData::Struct(data) = types.get(s) else {
            panic!("expected struct");
        };
        let offsets: Vec<u32> = data.members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28]);
        assert_eq!(data.align, 16);
        assert_eq!(data.size, 48);
    }

    #[test]
    fn explicit_layout_marker() {
        let mut types = TypeInterner::new();
        let f32_ty = types.f32();
        let s = types.struct_type(Symbol::new("Marked"), &[(Symbol::new("x"), f32_ty)]);
        assert!(!types.has_explicit_layout(s));
        types.mark_explicit_layout(s);
        assert!(types.has_explicit_layout(s));
        assert!(!types.has_explicit_layout(f32_ty));
    }

    #[test]
    fn unique_struct_name_skips_taken_names() {
        let mut types = TypeInterner::new();
        let f32_ty = types.f32();
        types.struct_type(Symbol::new("Taken"), &[(Symbol::new("x"), f32_ty)]);
        assert_eq!(types.unique_struct_name("Fresh"), "Fresh");
        assert_eq!(types.unique_struct_name("Taken"), "Taken_1");
    }

    #[test]
    fn display_types() {
        let mut types = TypeInterner::new();
        let f32_ty = types.f32();
        let v4 = types.vec(f32_ty, 4);
        let m = types.mat(v4, 2);
        let arr = types.array(f32_ty, 4);
        let rt = types.runtime_array(v4);
        let p = types.ptr(AddressSpace::Storage, arr, Access::ReadWrite);
        assert_eq!(types.display(v4).to_string(), "vec4<f32>");
        assert_eq!(types.display(m).to_string(), "mat2x4<f32>");
        assert_eq!(types.display(rt).to_string(), "array<vec4<f32>>");
        assert_eq!(
            types.display(p).to_string(),
            "ptr<storage, array<f32, 4>, read_write>"
        );
    }
}
