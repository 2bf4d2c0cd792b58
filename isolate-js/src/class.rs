use crate::error::fatal;
use crate::heap::object::bridge;
use crate::heap::InstanceKind;
use crate::isolate::Isolate;
use crate::scope::HandleScope;
use crate::tagged::{HeapRef, Tagged};
use crate::value::Local;
use crate::Error;
use core::num::NonZeroU32;

/// Id of an embedder-defined class. Instances remember the class they were created from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClassId(NonZeroU32);

impl ClassId {
  pub fn raw(self) -> u32 {
    self.0.get()
  }

  fn index(self) -> usize {
    self.0.get() as usize - 1
  }
}

/// Passed to a class finalizer while one of its instances is destroyed.
pub struct FinalizeInfo<'a> {
  /// The class whose finalizer is running.
  pub class: ClassId,
  pub class_name: &'a str,
  /// The class the instance was created from; `class` or a descendant of it.
  pub instance_class: ClassId,
  /// Small-integer internal fields of the instance.
  pub internal_fields: &'a [Option<i32>],
}

pub type Finalizer = Box<dyn FnMut(&FinalizeInfo<'_>) + Send>;

struct ClassDef {
  name: String,
  parent: Option<ClassId>,
  finalizer: Option<Finalizer>,
}

#[derive(Default)]
pub(crate) struct ClassRegistry {
  classes: Vec<ClassDef>,
}

impl ClassRegistry {
  fn define(&mut self, name: &str, parent: Option<ClassId>, finalizer: Option<Finalizer>) -> Result<ClassId, Error> {
    if parent.is_some_and(|parent| parent.index() >= self.classes.len()) {
      return Err(Error::InvalidArgument("unknown parent class"));
    }
    let raw = u32::try_from(self.classes.len() + 1)
      .ok()
      .and_then(NonZeroU32::new)
      .ok_or(Error::InvalidArgument("too many classes"))?;
    self.classes.push(ClassDef {
      name: name.to_string(),
      parent,
      finalizer,
    });
    Ok(ClassId(raw))
  }

  pub(crate) fn get(&self, raw: u64) -> Option<ClassId> {
    let id = NonZeroU32::new(u32::try_from(raw).ok()?).map(ClassId)?;
    (id.index() < self.classes.len()).then_some(id)
  }

  /// `None` for an id some other registry handed out.
  pub(crate) fn name(&self, class: ClassId) -> Option<&str> {
    self.classes.get(class.index()).map(|def| def.name.as_str())
  }

  fn def(&self, class: ClassId) -> &ClassDef {
    match self.classes.get(class.index()) {
      Some(def) => def,
      None => fatal!("{class:?} is not registered with this isolate"),
    }
  }

  /// `class` and its ancestors, most-derived first.
  pub(crate) fn chain(&self, class: ClassId) -> Vec<ClassId> {
    let mut chain = vec![class];
    let mut current = class;
    while let Some(parent) = self.def(current).parent {
      chain.push(parent);
      current = parent;
    }
    chain
  }

  /// Runs the finalizers of `instance_class` and every ancestor, most-derived first.
  pub(crate) fn run_finalizers(&mut self, instance_class: ClassId, internal_fields: &[Option<i32>]) {
    for class in self.chain(instance_class) {
      let def = &mut self.classes[class.index()];
      let Some(finalizer) = def.finalizer.as_mut() else {
        continue;
      };
      tracing::trace!(class = %def.name, "running class finalizer");
      finalizer(&FinalizeInfo {
        class,
        class_name: &def.name,
        instance_class,
        internal_fields,
      });
    }
  }
}

impl Isolate {
  /// Registers a class. Its finalizer runs when an instance of it, or of any class derived from
  /// it, is destroyed.
  pub fn define_class(
    &mut self,
    name: &str,
    parent: Option<ClassId>,
    finalizer: Option<Finalizer>,
  ) -> Result<ClassId, Error> {
    self.classes.define(name, parent, finalizer)
  }

  /// The name `class` was defined with, or `None` if it belongs to another isolate.
  pub fn class_name(&self, class: ClassId) -> Option<&str> {
    self.classes.name(class)
  }

  /// Runs class finalizers for a bridge being destroyed.
  pub(crate) fn finalize_instance(&mut self, obj: HeapRef) {
    let raw = self.heap.read_word(obj, bridge::CLASS);
    if raw == 0 {
      return;
    }
    let Some(class) = self.classes.get(raw) else {
      fatal!("{obj:?} carries unknown class id {raw}");
    };
    let fields = self.internal_field_smis(obj);
    self.classes.run_finalizers(class, &fields);
  }

  pub(crate) fn class_of(&self, obj: HeapRef) -> Option<ClassId> {
    self.classes.get(self.heap.read_word(obj, bridge::CLASS))
  }
}

impl<'i> HandleScope<'i> {
  /// Creates a host object that is an instance of `class`.
  ///
  /// The instance stays alive for as long as the host keeps its object alive, even with no handle
  /// or global on this side; once the host collects it, the next collection destroys it and runs
  /// the class finalizers.
  pub fn new_instance(&mut self, class: ClassId) -> Result<Local<'i>, Error> {
    if class.index() >= self.isolate.classes.classes.len() {
      return Err(Error::InvalidArgument("unknown class"));
    }
    let context = self.isolate.current_host_context()?;
    let host = self.isolate.host.new_object(context);
    let obj = self.isolate.bridge_for(host);
    debug_assert_eq!(self.isolate.heap.kind_of(obj), InstanceKind::Bridge);
    self.isolate.heap.write_word(obj, bridge::CLASS, u64::from(class.raw()));
    self.isolate.heap.write_word(obj, bridge::HOST_REFS, 1);
    Ok(self.local(Tagged::Heap(obj)))
  }

  /// Whether `value` was created from `class` or a class derived from it.
  pub fn is_instance_of(&self, value: Local<'_>, class: ClassId) -> bool {
    let Ok(obj) = self.isolate.expect_kind(value, InstanceKind::Bridge) else {
      return false;
    };
    self
      .isolate
      .class_of(obj)
      .is_some_and(|instance_class| self.isolate.classes.chain(instance_class).contains(&class))
  }

  pub fn class_of_instance(&self, value: Local<'_>) -> Option<ClassId> {
    let obj = self.isolate.expect_kind(value, InstanceKind::Bridge).ok()?;
    self.isolate.class_of(obj)
  }
}
