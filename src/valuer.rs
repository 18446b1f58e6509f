//! Valuer：插值阶段把值转换成驱动可接受的标量。
//!
//! 两种入口：
//! - `SqlValuer`：值自己实现转换。
//! - `ValuerFuncs`：按类型注册的转换函数，作用于 `SqlValue::Custom`。

use crate::value::SqlValue;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Valuer 转换失败。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sql valuer error: {0}")]
pub struct ValuerError(pub String);

/// 可在插值阶段动态计算实际值的 trait。
pub trait SqlValuer: dyn_clone::DynClone + std::fmt::Debug + Send + Sync {
    fn value(&self) -> Result<SqlValue, ValuerError>;
}

dyn_clone::clone_trait_object!(SqlValuer);

/// 交给 `ValuerFuncs` 处理的类型擦除值；`value == None` 表示类型化的空指针。
#[derive(Clone)]
pub struct CustomValue {
    type_id: TypeId,
    type_name: &'static str,
    value: Option<Arc<dyn Any + Send + Sync>>,
}

impl CustomValue {
    pub fn new<T: Any + Send + Sync>(v: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Some(Arc::new(v)),
        }
    }

    /// 类型化的空值（例如值为 `None` 的可选类型）。
    pub fn nil<T: Any + Send + Sync>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: None,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_nil(&self) -> bool {
        self.value.is_none()
    }

    pub fn get(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.value.as_deref()
    }
}

impl std::fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomValue")
            .field("type", &self.type_name)
            .field("nil", &self.is_nil())
            .finish()
    }
}

type ErasedValuer =
    Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<SqlValue, ValuerError> + Send + Sync>;

/// 按类型注册的 valuer 函数表。
#[derive(Clone, Default)]
pub struct ValuerFuncs {
    funcs: HashMap<TypeId, ErasedValuer>,
}

impl ValuerFuncs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为类型 `T` 注册转换函数；同一类型重复注册时后者覆盖前者。
    pub fn register<T, F>(&mut self, f: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Result<SqlValue, ValuerError> + Send + Sync + 'static,
    {
        let name = std::any::type_name::<T>();
        let erased: ErasedValuer = Arc::new(move |v| {
            let v = v
                .downcast_ref::<T>()
                .ok_or_else(|| ValuerError(format!("value is not a {name}")))?;
            f(v)
        });
        self.funcs.insert(TypeId::of::<T>(), erased);
        self
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.funcs.contains_key(&id)
    }

    pub(crate) fn call(
        &self,
        v: &CustomValue,
    ) -> Option<Result<Option<SqlValue>, ValuerError>> {
        let f = self.funcs.get(&v.type_id)?;
        Some(match v.get() {
            Some(inner) => f(inner).map(Some),
            None => Ok(None),
        })
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl std::fmt::Debug for ValuerFuncs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuerFuncs")
            .field("len", &self.funcs.len())
            .finish()
    }
}
