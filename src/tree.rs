//! MP4 のボックス階層を表現するツリー
//!
//! ノードは [`BoxTree`] が保持する配列（アリーナ）に格納され、
//! 親子関係はそのインデックスである [`BoxId`] で表現される。
//! そのため、親への参照は所有権を持たず、循環参照も発生しない。
//!
//! ツリーは [`BoxTreeBuilder`] でのみ構築でき、構築後は変更できない
use crate::{
    BoxType, Error, Result,
    boxes::{BoxPayload, BoxView},
};

/// ツリー内のボックスを識別するためのインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxId(usize);

impl BoxId {
    /// ルートボックスの ID
    pub const ROOT: Self = Self(0);

    /// アリーナ内での位置を返す
    pub const fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct BoxNode {
    box_type: BoxType,
    payload: BoxPayload,
    parent: Option<BoxId>,
    children: Vec<BoxId>,
}

/// 読み込み済みのボックス群を保持するツリー
#[derive(Debug, Clone)]
pub struct BoxTree {
    nodes: Vec<BoxNode>,
}

impl BoxTree {
    /// ルートボックスに割り当てられるボックス種別
    pub const ROOT_TYPE: BoxType = BoxType::Normal(*b"root");

    /// ルートボックスを返す
    pub fn root(&self) -> BoxRef<'_> {
        BoxRef {
            tree: self,
            id: BoxId::ROOT,
        }
    }

    /// 指定された ID のボックスを返す
    pub fn get(&self, id: BoxId) -> Option<BoxRef<'_>> {
        (id.0 < self.nodes.len()).then_some(BoxRef { tree: self, id })
    }

    /// ルートを含めたボックスの数を返す
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// ルートしか存在しないかどうかを返す
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// 全てのボックスを深さ優先の前順で走査する（ルートを含む）
    pub fn iter(&self) -> impl Iterator<Item = BoxRef<'_>> {
        self.root().descendants_inclusive()
    }

    fn node(&self, id: BoxId) -> &BoxNode {
        &self.nodes[id.0]
    }
}

/// ツリー内の一つのボックスへの参照
#[derive(Clone, Copy)]
pub struct BoxRef<'a> {
    tree: &'a BoxTree,
    id: BoxId,
}

impl<'a> BoxRef<'a> {
    /// このボックスの ID を返す
    pub fn id(self) -> BoxId {
        self.id
    }

    /// このボックスが属するツリーを返す
    pub fn tree(self) -> &'a BoxTree {
        self.tree
    }

    /// ボックス種別を返す
    pub fn box_type(self) -> BoxType {
        self.node().box_type
    }

    /// ペイロードを返す
    pub fn payload(self) -> &'a BoxPayload {
        &self.node().payload
    }

    /// ペイロードを `T` として参照する
    ///
    /// ペイロードの種類が異なる場合は [`ErrorKind::TypeMismatch`](crate::ErrorKind::TypeMismatch) エラーとなる
    #[track_caller]
    pub fn view<T: BoxView>(self) -> Result<&'a T> {
        T::from_payload(self.payload())
            .ok_or_else(|| Error::type_mismatch(T::TYPE, self.box_type()))
    }

    /// 直接の親ボックスを返す（ルートの場合は [`None`]）
    pub fn parent(self) -> Option<BoxRef<'a>> {
        self.node().parent.map(|id| self.with_id(id))
    }

    /// 直接の子ボックスをファイル内の出現順に返す
    pub fn children(self) -> impl Iterator<Item = BoxRef<'a>> {
        let tree = self.tree;
        self.node()
            .children
            .iter()
            .map(move |&id| BoxRef { tree, id })
    }

    /// 自分を除く子孫ボックスの中から、指定された種別のものを深さ優先の前順で探す
    ///
    /// 直接の子に限定せず、サブツリー全体が探索対象となる
    pub fn get_child(self, box_type: BoxType) -> Option<BoxRef<'a>> {
        self.descendants().find(|b| b.box_type() == box_type)
    }

    /// 自分を除く祖先ボックスの中から、指定された種別のものを近い順に探す
    pub fn get_parent(self, box_type: BoxType) -> Option<BoxRef<'a>> {
        self.ancestors().find(|b| b.box_type() == box_type)
    }

    /// [`BoxRef::get_child()`] と同様だが、見つからない場合は [`ErrorKind::Parse`](crate::ErrorKind::Parse) エラーを返す
    #[track_caller]
    pub fn expect_child(self, box_type: BoxType) -> Result<BoxRef<'a>> {
        crate::boxes::check_mandatory_box(
            self.get_child(box_type),
            &box_type.to_string(),
            &self.box_type().to_string(),
        )
    }

    /// 自分を除く子孫ボックスを深さ優先の前順で走査する
    pub fn descendants(self) -> impl Iterator<Item = BoxRef<'a>> {
        self.descendants_inclusive().skip(1)
    }

    /// 自分を除く祖先ボックスを近い順に走査する
    pub fn ancestors(self) -> impl Iterator<Item = BoxRef<'a>> {
        std::iter::successors(self.parent(), |b| b.parent())
    }

    fn descendants_inclusive(self) -> impl Iterator<Item = BoxRef<'a>> {
        let tree = self.tree;
        let mut stack = vec![self.id];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            stack.extend(tree.node(id).children.iter().rev());
            Some(BoxRef { tree, id })
        })
    }

    fn with_id(self, id: BoxId) -> Self {
        Self {
            tree: self.tree,
            id,
        }
    }

    fn node(self) -> &'a BoxNode {
        self.tree.node(self.id)
    }
}

impl std::fmt::Debug for BoxRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxRef")
            .field("id", &self.id)
            .field("box_type", &self.box_type())
            .finish()
    }
}

/// [`BoxTree`] を構築するためのビルダー
///
/// ボックスはファイル内の出現順に追加する必要がある
#[derive(Debug)]
pub struct BoxTreeBuilder {
    nodes: Vec<BoxNode>,
}

impl BoxTreeBuilder {
    /// ルートだけを持つビルダーを生成する
    pub fn new() -> Self {
        Self {
            nodes: vec![BoxNode {
                box_type: BoxTree::ROOT_TYPE,
                payload: BoxPayload::Root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// `parent` の末尾の子としてボックスを追加し、その ID を返す
    ///
    /// `parent` がこのビルダー内に存在しない場合は [`ErrorKind::Parse`](crate::ErrorKind::Parse) エラーとなる
    pub fn push(&mut self, parent: BoxId, box_type: BoxType, payload: BoxPayload) -> Result<BoxId> {
        let id = BoxId(self.nodes.len());
        let parent_node = self
            .nodes
            .get_mut(parent.0)
            .ok_or_else(|| Error::parse(format!("Unknown parent box: {parent:?}")))?;
        parent_node.children.push(id);
        self.nodes.push(BoxNode {
            box_type,
            payload,
            parent: Some(parent),
            children: Vec::new(),
        });
        Ok(id)
    }

    /// 構築を完了する
    pub fn build(self) -> BoxTree {
        BoxTree { nodes: self.nodes }
    }
}

impl Default for BoxTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
