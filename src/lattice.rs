//! The lattice of inferable types.
//!
//! Every type the solver manipulates lives in a [`TypePool`] owned by the
//! inference run and is referred to by [`TypeIndex`]. Types are immutable
//! once inserted; a data pointer's pointee is always inserted before its
//! referrer, so the pool never holds a cycle.

use itertools::Itertools;

/// An opaque index into the [`TypePool`].
///
/// Note: derived equality is *identity* of pool slots. Whether two indexes
/// denote equivalent types is a question for [`TypePool::is_equal_to`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeIndex(usize);

/// What a code pointer points at. `Label` is the more general kind: every
/// function entry is a jump target, but not every jump target is callable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum CodePointerKind {
    Label,
    Function,
}

/// The category of a lattice type, used for walking the specialization tree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Category {
    Any,
    Integral,
    SignedInteger,
    UnsignedInteger,
    Pointer,
    DataPointer,
    CodePointer,
    Union,
    Intersection,
}

impl Category {
    /// The parent category in the specialization tree, or `None` for the
    /// top and for composites (which sit outside the tree).
    fn parent(&self) -> Option<Category> {
        use Category::*;
        match self {
            Any => None,
            Integral => Some(Any),
            SignedInteger | UnsignedInteger | Pointer => Some(Integral),
            DataPointer | CodePointer => Some(Pointer),
            Union | Intersection => None,
        }
    }

    fn is_composite(&self) -> bool {
        matches!(self, Category::Union | Category::Intersection)
    }
}

/// An element of the type lattice. Widths are in bits; width `0` means
/// "unspecified".
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LatticeType {
    /// The top of the lattice
    Any,
    /// An integer-shaped bitvector of unknown interpretation
    Integral { width: usize },
    SignedInteger { width: usize },
    UnsignedInteger { width: usize },
    /// A raw pointer: integer-shaped, pointer-width, pointee unknown
    Pointer { width: usize },
    /// A pointer to a known pointee type
    DataPointer { width: usize, pointee: TypeIndex },
    /// A pointer into code
    CodePointer { width: usize, kind: CodePointerKind },
    /// A join of several types; only produced by the solver when merging
    /// disjunction branches
    Union(Vec<TypeIndex>),
    /// A meet of several types
    Intersection(Vec<TypeIndex>),
}

impl LatticeType {
    pub fn category(&self) -> Category {
        match self {
            LatticeType::Any => Category::Any,
            LatticeType::Integral { .. } => Category::Integral,
            LatticeType::SignedInteger { .. } => Category::SignedInteger,
            LatticeType::UnsignedInteger { .. } => Category::UnsignedInteger,
            LatticeType::Pointer { .. } => Category::Pointer,
            LatticeType::DataPointer { .. } => Category::DataPointer,
            LatticeType::CodePointer { .. } => Category::CodePointer,
            LatticeType::Union(_) => Category::Union,
            LatticeType::Intersection(_) => Category::Intersection,
        }
    }

    /// The width payload shared by every non-top simple category.
    fn width(&self) -> Option<usize> {
        match self {
            LatticeType::Integral { width }
            | LatticeType::SignedInteger { width }
            | LatticeType::UnsignedInteger { width }
            | LatticeType::Pointer { width }
            | LatticeType::DataPointer { width, .. }
            | LatticeType::CodePointer { width, .. } => Some(*width),
            LatticeType::Any | LatticeType::Union(_) | LatticeType::Intersection(_) => None,
        }
    }

    fn composite_members(&self) -> Option<&[TypeIndex]> {
        match self {
            LatticeType::Union(members) | LatticeType::Intersection(members) => Some(members),
            _ => None,
        }
    }
}

/// The arena of lattice types for one inference run.
#[derive(Default, Debug)]
pub struct TypePool {
    types: Vec<LatticeType>,
}

impl TypePool {
    pub fn new() -> Self {
        Self { types: vec![] }
    }

    /// Insert a type, returning its index. The pool never deduplicates;
    /// equivalent types may live at distinct indexes.
    pub fn insert(&mut self, typ: LatticeType) -> TypeIndex {
        let idx = TypeIndex(self.types.len());
        self.types.push(typ);
        idx
    }

    pub fn get(&self, idx: TypeIndex) -> &LatticeType {
        &self.types[idx.0]
    }

    pub fn any(&mut self) -> TypeIndex {
        self.insert(LatticeType::Any)
    }

    pub fn integral(&mut self, width: usize) -> TypeIndex {
        self.insert(LatticeType::Integral { width })
    }

    pub fn signed(&mut self, width: usize) -> TypeIndex {
        self.insert(LatticeType::SignedInteger { width })
    }

    pub fn unsigned(&mut self, width: usize) -> TypeIndex {
        self.insert(LatticeType::UnsignedInteger { width })
    }

    pub fn pointer(&mut self, width: usize) -> TypeIndex {
        self.insert(LatticeType::Pointer { width })
    }

    pub fn data_pointer(&mut self, width: usize, pointee: TypeIndex) -> TypeIndex {
        self.insert(LatticeType::DataPointer { width, pointee })
    }

    pub fn code_pointer(&mut self, width: usize, kind: CodePointerKind) -> TypeIndex {
        self.insert(LatticeType::CodePointer { width, kind })
    }

    /// Lattice comparison: is `a` at least as general as `b`?
    pub fn is_generalization_of(&self, a: TypeIndex, b: TypeIndex) -> bool {
        match self.get(a) {
            LatticeType::Union(_) => self.is_superset_of(a, b),
            LatticeType::Intersection(_) => self.is_subset_of(a, b),
            _ => {
                if self.get(b).category().is_composite() {
                    // Let the composite side run the comparison.
                    return match self.get(b) {
                        LatticeType::Union(_) => self.is_subset_of(b, a),
                        LatticeType::Intersection(_) => self.is_superset_of(b, a),
                        _ => unreachable!(),
                    };
                }
                self.simple_is_generalization_of(a, b)
            }
        }
    }

    /// Lattice comparison: is `a` at least as specific as `b`?
    pub fn is_specialization_of(&self, a: TypeIndex, b: TypeIndex) -> bool {
        self.is_generalization_of(b, a)
    }

    /// Semantic equivalence of two types.
    pub fn is_equal_to(&self, a: TypeIndex, b: TypeIndex) -> bool {
        let (ta, tb) = (self.get(a), self.get(b));
        match (ta.composite_members(), tb.composite_members()) {
            (Some(xs), Some(ys)) => {
                ta.category() == tb.category()
                    && xs.len() == ys.len()
                    && xs
                        .iter()
                        .all(|&x| ys.iter().any(|&y| self.is_equal_to(x, y)))
            }
            (Some(xs), None) => xs.len() == 1 && self.is_equal_to(xs[0], b),
            (None, Some(ys)) => ys.len() == 1 && self.is_equal_to(a, ys[0]),
            (None, None) => {
                ta.category() == tb.category()
                    && self.lateral_is_generalization_of(a, b)
                    && self.lateral_is_generalization_of(b, a)
            }
        }
    }

    /// Generalization between two simple types: walk `b`'s ancestor chain
    /// looking for `a`'s category, then compare the lateral payloads.
    fn simple_is_generalization_of(&self, a: TypeIndex, b: TypeIndex) -> bool {
        let target = self.get(a).category();
        let mut current = Some(self.get(b).category());
        while let Some(cat) = current {
            if cat == target {
                return self.lateral_is_generalization_of(a, b);
            }
            current = cat.parent();
        }
        false
    }

    /// The lateral part of the comparison, once the category relation is
    /// established. A smaller width is the more general side; width `0`
    /// ("unspecified") is the most general width of all.
    fn lateral_is_generalization_of(&self, a: TypeIndex, b: TypeIndex) -> bool {
        match self.get(a) {
            LatticeType::Any => true,
            LatticeType::Integral { width }
            | LatticeType::SignedInteger { width }
            | LatticeType::UnsignedInteger { width }
            | LatticeType::Pointer { width } => match self.get(b).width() {
                Some(other) => *width <= other,
                None => false,
            },
            LatticeType::DataPointer { width, pointee } => match self.get(b) {
                LatticeType::DataPointer {
                    width: other_width,
                    pointee: other_pointee,
                } => width <= other_width && self.is_generalization_of(*pointee, *other_pointee),
                _ => false,
            },
            LatticeType::CodePointer { width, kind } => match self.get(b) {
                LatticeType::CodePointer {
                    width: other_width,
                    kind: other_kind,
                } => width <= other_width && kind <= other_kind,
                _ => false,
            },
            LatticeType::Union(_) | LatticeType::Intersection(_) => unreachable!(),
        }
    }

    /// Every member of `of`'s type-set has an equivalent member inside the
    /// composite at `composite`.
    fn is_superset_of(&self, composite: TypeIndex, of: TypeIndex) -> bool {
        let members = self.get(composite).composite_members().unwrap();
        match self.get(of).composite_members() {
            Some(others) => others
                .iter()
                .all(|&o| members.iter().any(|&m| self.is_equal_to(m, o))),
            None => members.iter().any(|&m| self.is_equal_to(m, of)),
        }
    }

    /// Every member of the composite at `composite` has an equivalent member
    /// in `of`'s type-set.
    fn is_subset_of(&self, composite: TypeIndex, of: TypeIndex) -> bool {
        let members = self.get(composite).composite_members().unwrap();
        match self.get(of).composite_members() {
            Some(others) => members
                .iter()
                .all(|&m| others.iter().any(|&o| self.is_equal_to(m, o))),
            None => members.len() == 1 && self.is_equal_to(members[0], of),
        }
    }

    /// The smallest union containing both `a` and `b`. Unions flatten into
    /// the result; anything else joins as an atom. A join that collapses to
    /// one element returns that element directly rather than a one-member
    /// union.
    pub fn union_join(&mut self, a: TypeIndex, b: TypeIndex) -> TypeIndex {
        let mut members: Vec<TypeIndex> = match self.get(a) {
            LatticeType::Union(xs) => xs.clone(),
            _ => vec![a],
        };
        let additions: Vec<TypeIndex> = match self.get(b) {
            LatticeType::Union(ys) => ys.clone(),
            _ => vec![b],
        };
        let mut grew = false;
        for y in additions {
            if !members.iter().any(|&m| self.is_equal_to(m, y)) {
                members.push(y);
                grew = true;
            }
        }
        if !grew {
            return a;
        }
        if members.len() == 1 {
            return members[0];
        }
        self.insert(LatticeType::Union(members))
    }

    /// A displayable rendering of the type at `idx`.
    pub fn render(&self, idx: TypeIndex) -> PrintableType<'_> {
        PrintableType { pool: self, idx }
    }
}

/// Textual rendering of a lattice type: a category glyph (`_`, `s`, `u`,
/// `p`) followed by `int<width>` for the integer shapes, `<pointee>*` for
/// data pointers, `funcptr`/`labelptr` for code pointers, and `U(…)`/`A(…)`
/// for composites.
pub struct PrintableType<'a> {
    pool: &'a TypePool,
    idx: TypeIndex,
}

impl std::fmt::Display for PrintableType<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let pool = self.pool;
        match pool.get(self.idx) {
            LatticeType::Any => write!(f, "<any>"),
            LatticeType::Integral { width } => write!(f, "_int{}", width),
            LatticeType::SignedInteger { width } => write!(f, "sint{}", width),
            LatticeType::UnsignedInteger { width } => write!(f, "uint{}", width),
            LatticeType::Pointer { width } => write!(f, "pint{}", width),
            LatticeType::DataPointer { pointee, .. } => {
                write!(f, "{}*", pool.render(*pointee))
            }
            LatticeType::CodePointer { kind, .. } => match kind {
                CodePointerKind::Function => write!(f, "funcptr"),
                CodePointerKind::Label => write!(f, "labelptr"),
            },
            LatticeType::Union(members) => {
                write!(
                    f,
                    "U({})",
                    members.iter().map(|&m| pool.render(m)).format(", ")
                )
            }
            LatticeType::Intersection(members) => {
                write!(
                    f,
                    "A({})",
                    members.iter().map(|&m| pool.render(m)).format(", ")
                )
            }
        }
    }
}

impl std::fmt::Debug for PrintableType<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
